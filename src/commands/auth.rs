//! Account/session IPC commands.

use serde_json::Value;
use std::sync::Arc;
use tauri::{Emitter, Manager};

use crate::{auth, db, storage, sync};

fn parse_login_payload(arg0: Option<Value>) -> Result<(String, String), String> {
    let payload = arg0.ok_or("Missing login payload")?;
    let email = payload
        .get("email")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or("Missing required field: email")?;
    let password = payload
        .get("password")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .ok_or("Missing required field: password")?;
    Ok((email, password))
}

/// Kick off the post-login sync pass without blocking the login response.
/// The task opens its own database connection, like every other background
/// worker.
fn spawn_initial_sync(app: tauri::AppHandle, state: Arc<sync::SyncState>) {
    tauri::async_runtime::spawn(async move {
        let Ok(app_data_dir) = app.path().app_data_dir() else {
            return;
        };
        let db = match db::init(&app_data_dir) {
            Ok(db) => db,
            Err(e) => {
                tracing::warn!(error = %e, "post-login sync: database unavailable");
                return;
            }
        };
        match sync::sync_with_stored_client(&db, &state).await {
            Ok(outcome) => {
                tracing::debug!(?outcome, "post-login sync finished");
            }
            Err(e) => {
                tracing::warn!(error = %e, "post-login sync failed");
                let _ = app.emit(
                    "sync_failed",
                    serde_json::json!({ "message": sync::SYNC_FAILED_MESSAGE }),
                );
            }
        }
        let _ = app.emit("sync_status", state.status_json(None));
    });
}

#[tauri::command]
pub async fn account_login(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    sync_state: tauri::State<'_, Arc<sync::SyncState>>,
) -> Result<Value, String> {
    let (email, password) = parse_login_payload(arg0)?;
    let user = auth::login(&email, &password).await?;

    let _ = app.emit("session_changed", user.to_json());
    spawn_initial_sync(app.clone(), sync_state.inner().clone());

    Ok(user.to_json())
}

#[tauri::command]
pub async fn account_logout(
    app: tauri::AppHandle,
    sync_state: tauri::State<'_, Arc<sync::SyncState>>,
) -> Result<(), String> {
    auth::logout(&sync_state).await?;
    let _ = app.emit("session_changed", Value::Null);
    Ok(())
}

#[tauri::command]
pub async fn account_get_session() -> Result<Value, String> {
    Ok(auth::current_session()
        .map(|u| u.to_json())
        .unwrap_or(Value::Null))
}

#[tauri::command]
pub async fn cloud_get_config() -> Result<Value, String> {
    Ok(storage::get_cloud_config())
}

#[tauri::command]
pub async fn cloud_update_config(arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing cloud config payload")?;
    storage::update_cloud_config(&payload)
}

/// Forget every stored credential: endpoint config, session, and the active
/// business selection. Local ledger data is untouched.
#[tauri::command]
pub async fn cloud_factory_reset(
    app: tauri::AppHandle,
    sync_state: tauri::State<'_, Arc<sync::SyncState>>,
) -> Result<Value, String> {
    let result = storage::factory_reset()?;
    sync_state.reset();
    let _ = app.emit("session_changed", Value::Null);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login_payload_requires_both_fields() {
        assert!(parse_login_payload(None).is_err());
        assert!(parse_login_payload(Some(serde_json::json!({ "email": "a@b.c" }))).is_err());
        assert!(
            parse_login_payload(Some(serde_json::json!({ "email": "  ", "password": "x" })))
                .is_err()
        );
        let (email, password) = parse_login_payload(Some(
            serde_json::json!({ "email": " a@b.c ", "password": "secret" }),
        ))
        .unwrap();
        assert_eq!(email, "a@b.c");
        assert_eq!(password, "secret");
    }
}
