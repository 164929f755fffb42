//! Cloud account sessions.
//!
//! The app signs in against the cloud store's account API; the resulting
//! session secret and user identity are persisted in the OS keyring so a
//! restart stays signed in. The sync engine treats the absence of a session
//! as "do nothing" — everything else in the app keeps working offline.

use serde_json::Value;
use tracing::{info, warn};

use crate::api::CloudClient;
use crate::storage;
use crate::sync::SyncState;

/// The authenticated user as the rest of the app sees it.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: String,
    pub name: String,
    pub email: String,
}

impl SessionUser {
    /// Convert to the JSON shape the frontend expects.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "userId": self.user_id,
            "name": self.name,
            "email": self.email,
        })
    }
}

/// Read the persisted session, if any.
pub fn current_session() -> Option<SessionUser> {
    let user_id = storage::get_credential(storage::KEY_SESSION_USER_ID)?;
    if !storage::has_credential(storage::KEY_SESSION_SECRET) {
        return None;
    }
    Some(SessionUser {
        user_id,
        name: storage::get_credential(storage::KEY_SESSION_USER_NAME).unwrap_or_default(),
        email: storage::get_credential(storage::KEY_SESSION_USER_EMAIL).unwrap_or_default(),
    })
}

/// Sign in with email/password and persist the session.
pub async fn login(email: &str, password: &str) -> Result<SessionUser, String> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err("Email and password are required".into());
    }

    let endpoint = storage::get_credential(storage::KEY_CLOUD_ENDPOINT)
        .ok_or("Cloud store not configured: missing endpoint")?;
    let project_id = storage::get_credential(storage::KEY_CLOUD_PROJECT_ID)
        .ok_or("Cloud store not configured: missing project id")?;

    let client = CloudClient::new(&endpoint, &project_id, None)?;
    let session = client
        .create_email_session(email, password)
        .await
        .map_err(|e| e.to_string())?;

    let secret = session
        .get("secret")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| session.get("$id").and_then(Value::as_str))
        .ok_or("Sign-in response did not include a session secret")?
        .to_string();
    let user_id = session
        .get("userId")
        .and_then(Value::as_str)
        .ok_or("Sign-in response did not include a user id")?
        .to_string();

    // Re-authenticate with the fresh secret to fetch the account profile.
    let account_client = CloudClient::new(&endpoint, &project_id, Some(secret.clone()))?;
    let account = account_client
        .get_account()
        .await
        .map_err(|e| e.to_string())?;
    let name = account
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let account_email = account
        .get("email")
        .and_then(Value::as_str)
        .unwrap_or(email)
        .to_string();

    storage::store_session(&secret, &user_id, &name, &account_email)?;
    info!(user_id = %user_id, "signed in");

    Ok(SessionUser {
        user_id,
        name,
        email: account_email,
    })
}

/// Sign out: best-effort remote session deletion, then clear local session
/// state and reset the sync engine's status.
pub async fn logout(sync_state: &SyncState) -> Result<(), String> {
    if let Ok(client) = CloudClient::from_storage() {
        if let Err(e) = client.delete_current_session().await {
            warn!(error = %e, "remote session deletion failed; clearing local session anyway");
        }
    }

    storage::clear_session()?;
    sync_state.reset();
    info!("signed out");
    Ok(())
}
