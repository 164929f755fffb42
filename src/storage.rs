//! Secure local config storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. Holds the cloud endpoint config, the
//! authenticated session, and the active business selection — everything that
//! must survive a reload but lives outside the SQLite database.

use keyring::Entry;
use serde_json::Value;
use tracing::{info, warn};

const SERVICE_NAME: &str = "the-small-books";

// Credential keys
pub const KEY_CLOUD_ENDPOINT: &str = "cloud_endpoint";
pub const KEY_CLOUD_PROJECT_ID: &str = "cloud_project_id";
pub const KEY_SESSION_SECRET: &str = "session_secret";
pub const KEY_SESSION_USER_ID: &str = "session_user_id";
pub const KEY_SESSION_USER_NAME: &str = "session_user_name";
pub const KEY_SESSION_USER_EMAIL: &str = "session_user_email";
pub const KEY_ACTIVE_BUSINESS_ID: &str = "active_business_id";

/// Keys cleared on logout.
const SESSION_KEYS: &[&str] = &[
    KEY_SESSION_SECRET,
    KEY_SESSION_USER_ID,
    KEY_SESSION_USER_NAME,
    KEY_SESSION_USER_EMAIL,
];

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[
    KEY_CLOUD_ENDPOINT,
    KEY_CLOUD_PROJECT_ID,
    KEY_SESSION_SECRET,
    KEY_SESSION_USER_ID,
    KEY_SESSION_USER_NAME,
    KEY_SESSION_USER_EMAIL,
    KEY_ACTIVE_BUSINESS_ID,
];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key).is_some()
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// The app is considered configured when the cloud endpoint and project id
/// are both present in the credential store.
pub fn is_configured() -> bool {
    has_credential(KEY_CLOUD_ENDPOINT) && has_credential(KEY_CLOUD_PROJECT_ID)
}

/// Return stored cloud config as a JSON value in the shape the frontend
/// settings screen expects. The session secret is never included.
pub fn get_cloud_config() -> Value {
    serde_json::json!({
        "endpoint":   get_credential(KEY_CLOUD_ENDPOINT),
        "projectId":  get_credential(KEY_CLOUD_PROJECT_ID),
        "configured": is_configured(),
        "signedIn":   has_credential(KEY_SESSION_SECRET),
        "userId":     get_credential(KEY_SESSION_USER_ID),
        "userName":   get_credential(KEY_SESSION_USER_NAME),
        "userEmail":  get_credential(KEY_SESSION_USER_EMAIL),
    })
}

/// Store the cloud endpoint + project id received from the settings screen.
pub fn update_cloud_config(payload: &Value) -> Result<Value, String> {
    let endpoint = payload
        .get("endpoint")
        .or_else(|| payload.get("cloudEndpoint"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or("Missing required field: endpoint")?;
    let project_id = payload
        .get("projectId")
        .or_else(|| payload.get("project_id"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or("Missing required field: projectId")?;

    let normalized = crate::api::normalize_endpoint_url(&endpoint);
    set_credential(KEY_CLOUD_ENDPOINT, &normalized)?;
    set_credential(KEY_CLOUD_PROJECT_ID, &project_id)?;

    info!(project_id = %project_id, "cloud config updated");
    Ok(serde_json::json!({ "success": true }))
}

/// Persist an authenticated session.
pub fn store_session(secret: &str, user_id: &str, name: &str, email: &str) -> Result<(), String> {
    set_credential(KEY_SESSION_SECRET, secret)?;
    set_credential(KEY_SESSION_USER_ID, user_id)?;
    set_credential(KEY_SESSION_USER_NAME, name)?;
    set_credential(KEY_SESSION_USER_EMAIL, email)?;
    Ok(())
}

/// Remove the stored session (logout). The cloud endpoint config and the
/// active business selection are kept.
pub fn clear_session() -> Result<(), String> {
    for key in SESSION_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}

/// Delete every stored credential (full reset).
pub fn factory_reset() -> Result<Value, String> {
    info!("performing factory reset - deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(serde_json::json!({ "success": true }))
}
