//! Ledger record IPC commands (categories, parties, staff, items,
//! transactions, per-tenant settings).
//!
//! All entities share the same storage contract, so each command is a thin
//! wrapper over the table-handle helpers. Writes strip the `id`/`remoteId`
//! keys: local ids are store-assigned and the cloud linkage is owned by the
//! sync engine.

use serde_json::Value;

use crate::db::DbState;
use crate::store::{self, Table};

fn parse_local_id(arg0: &Option<Value>) -> Result<i64, String> {
    match arg0 {
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| "Invalid record id".to_string()),
        Some(Value::Object(obj)) => obj
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| "Missing record id".to_string()),
        _ => Err("Missing record id".to_string()),
    }
}

fn parse_business_filter(arg0: &Option<Value>) -> Option<i64> {
    match arg0 {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::Object(obj)) => obj.get("businessId").and_then(Value::as_i64),
        _ => None,
    }
}

/// Strip the store-owned keys from a UI payload.
fn writable_fields(payload: &Value) -> Result<Value, String> {
    let mut obj = payload
        .as_object()
        .cloned()
        .ok_or("Record payload must be an object")?;
    obj.remove("id");
    obj.remove("remoteId");
    Ok(Value::Object(obj))
}

fn list_records(db: &DbState, table: Table, arg0: Option<Value>) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let rows = match parse_business_filter(&arg0) {
        Some(business_id) => store::get_all_for_business(&conn, table, business_id)?,
        None => store::get_all(&conn, table)?,
    };
    Ok(Value::Array(rows))
}

fn create_record(db: &DbState, table: Table, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing record payload")?;
    let fields = writable_fields(&payload)?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let local_id = store::insert(&conn, table, &fields)?;
    store::get(&conn, table, local_id)?.ok_or_else(|| "created record missing".to_string())
}

fn update_record(db: &DbState, table: Table, arg0: Option<Value>) -> Result<Value, String> {
    let local_id = parse_local_id(&arg0)?;
    let payload = arg0.ok_or("Missing record payload")?;
    let fields = writable_fields(&payload)?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    store::update_by_local_id(&conn, table, local_id, &fields)?;
    store::get(&conn, table, local_id)?
        .ok_or_else(|| format!("No {} record with id {local_id}", table.sql_table()))
}

fn delete_record(db: &DbState, table: Table, arg0: Option<Value>) -> Result<Value, String> {
    let local_id = parse_local_id(&arg0)?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    store::delete(&conn, table, local_id)?;
    Ok(serde_json::json!({ "success": true }))
}

// -- Categories --------------------------------------------------------------

#[tauri::command]
pub async fn category_get_all(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    list_records(&db, Table::Categories, arg0)
}

#[tauri::command]
pub async fn category_create(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    create_record(&db, Table::Categories, arg0)
}

#[tauri::command]
pub async fn category_update(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    update_record(&db, Table::Categories, arg0)
}

#[tauri::command]
pub async fn category_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    delete_record(&db, Table::Categories, arg0)
}

// -- Parties -----------------------------------------------------------------

#[tauri::command]
pub async fn party_get_all(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    list_records(&db, Table::Parties, arg0)
}

#[tauri::command]
pub async fn party_create(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    create_record(&db, Table::Parties, arg0)
}

#[tauri::command]
pub async fn party_update(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    update_record(&db, Table::Parties, arg0)
}

#[tauri::command]
pub async fn party_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    delete_record(&db, Table::Parties, arg0)
}

// -- Staff -------------------------------------------------------------------

#[tauri::command]
pub async fn staff_get_all(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    list_records(&db, Table::Staff, arg0)
}

#[tauri::command]
pub async fn staff_create(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    create_record(&db, Table::Staff, arg0)
}

#[tauri::command]
pub async fn staff_update(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    update_record(&db, Table::Staff, arg0)
}

#[tauri::command]
pub async fn staff_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    delete_record(&db, Table::Staff, arg0)
}

// -- Items -------------------------------------------------------------------

#[tauri::command]
pub async fn item_get_all(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    list_records(&db, Table::Items, arg0)
}

#[tauri::command]
pub async fn item_create(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    create_record(&db, Table::Items, arg0)
}

#[tauri::command]
pub async fn item_update(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    update_record(&db, Table::Items, arg0)
}

#[tauri::command]
pub async fn item_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    delete_record(&db, Table::Items, arg0)
}

// -- Transactions ------------------------------------------------------------

#[tauri::command]
pub async fn transaction_get_all(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    list_records(&db, Table::Transactions, arg0)
}

#[tauri::command]
pub async fn transaction_create(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    create_record(&db, Table::Transactions, arg0)
}

#[tauri::command]
pub async fn transaction_update(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    update_record(&db, Table::Transactions, arg0)
}

#[tauri::command]
pub async fn transaction_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    delete_record(&db, Table::Transactions, arg0)
}

// -- Settings ----------------------------------------------------------------

#[tauri::command]
pub async fn settings_get(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    let business_id = parse_business_filter(&arg0).ok_or("Missing businessId")?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let row = store::get_all_for_business(&conn, Table::Settings, business_id)?
        .into_iter()
        .next();
    Ok(row.unwrap_or(Value::Null))
}

/// Upsert the per-tenant settings row.
#[tauri::command]
pub async fn settings_update(
    arg0: Option<Value>,
    db: tauri::State<'_, DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing settings payload")?;
    let business_id = payload
        .get("businessId")
        .and_then(Value::as_i64)
        .ok_or("Missing businessId")?;
    let fields = writable_fields(&payload)?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let existing = store::get_all_for_business(&conn, Table::Settings, business_id)?
        .into_iter()
        .next();
    let local_id = match existing {
        Some(row) => {
            let id = row
                .get("id")
                .and_then(Value::as_i64)
                .ok_or("settings row missing id")?;
            store::update_by_local_id(&conn, Table::Settings, id, &fields)?;
            id
        }
        None => store::insert(&conn, Table::Settings, &fields)?,
    };
    store::get(&conn, Table::Settings, local_id)?
        .ok_or_else(|| "settings row missing after write".to_string())
}
