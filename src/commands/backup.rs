//! Backup/restore IPC commands.

use serde_json::Value;

use crate::{backup, business, db};

#[tauri::command]
pub async fn backup_export(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    backup::export_backup(&db, business::active_business_id())
}

#[tauri::command]
pub async fn backup_restore(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing backup payload")?;
    backup::restore_backup_checked(&db, &payload)
}
