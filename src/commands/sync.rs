//! Sync IPC commands.

use serde_json::Value;
use std::sync::Arc;
use tauri::Emitter;

use crate::{db, sync};

/// Run a reconciliation pass now. Skipped silently when signed out or when
/// a pass is already running; a systemic failure is surfaced once as the
/// generic connection message.
#[tauri::command]
pub async fn sync_force(
    app: tauri::AppHandle,
    db: tauri::State<'_, db::DbState>,
    sync_state: tauri::State<'_, Arc<sync::SyncState>>,
) -> Result<Value, String> {
    let result = sync::sync_with_stored_client(&db, &sync_state).await;
    let _ = app.emit("sync_status", sync_state.status_json(None));

    match result {
        Ok(outcome) => Ok(outcome.to_json()),
        Err(e) => {
            let _ = app.emit(
                "sync_failed",
                serde_json::json!({ "message": sync::SYNC_FAILED_MESSAGE }),
            );
            Err(e)
        }
    }
}

#[tauri::command]
pub async fn sync_get_status(
    sync_state: tauri::State<'_, Arc<sync::SyncState>>,
) -> Result<Value, String> {
    Ok(sync_state.status_json(None))
}

#[tauri::command]
pub async fn network_get_status() -> Result<Value, String> {
    let is_online = sync::check_network_online().await;
    Ok(serde_json::json!({ "isOnline": is_online }))
}
