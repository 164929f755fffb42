//! Tenant (business) IPC commands.

use serde_json::Value;

use crate::{business, db, store};

fn parse_business_id(arg0: Option<Value>) -> Result<i64, String> {
    match arg0 {
        Some(Value::Number(n)) => n.as_i64().ok_or("Invalid business id".into()),
        Some(Value::Object(obj)) => obj
            .get("businessId")
            .or_else(|| obj.get("id"))
            .and_then(Value::as_i64)
            .ok_or("Missing businessId".into()),
        _ => Err("Missing businessId".into()),
    }
}

#[tauri::command]
pub async fn business_get_all(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let rows = store::get_all(&conn, store::Table::Businesses)?;
    Ok(Value::Array(rows))
}

#[tauri::command]
pub async fn business_get_current(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    Ok(business::current_business(&db)?.unwrap_or(Value::Null))
}

#[tauri::command]
pub async fn business_switch(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let business_id = parse_business_id(arg0)?;
    business::switch_business(&db, business_id)
}

#[tauri::command]
pub async fn business_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing business payload")?;
    let name = payload
        .get("name")
        .and_then(Value::as_str)
        .ok_or("Missing required field: name")?;
    let currency = payload
        .get("currency")
        .and_then(Value::as_str)
        .unwrap_or(business::DEFAULT_CURRENCY);
    business::create_business(&db, name, currency)
}

#[tauri::command]
pub async fn business_update(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing business payload")?;
    let business_id = payload
        .get("id")
        .and_then(Value::as_i64)
        .ok_or("Missing business id")?;

    // The linkage columns are sync-owned; the UI cannot touch them.
    let mut fields = payload.as_object().cloned().unwrap_or_default();
    fields.remove("id");
    fields.remove("remoteId");

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    store::update_by_local_id(
        &conn,
        store::Table::Businesses,
        business_id,
        &Value::Object(fields),
    )?;
    store::get(&conn, store::Table::Businesses, business_id)?
        .ok_or_else(|| format!("No business with id {business_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_business_id_accepts_number_and_object() {
        assert_eq!(parse_business_id(Some(serde_json::json!(4))).unwrap(), 4);
        assert_eq!(
            parse_business_id(Some(serde_json::json!({ "businessId": 7 }))).unwrap(),
            7
        );
        assert_eq!(
            parse_business_id(Some(serde_json::json!({ "id": 2 }))).unwrap(),
            2
        );
        assert!(parse_business_id(None).is_err());
        assert!(parse_business_id(Some(serde_json::json!("four"))).is_err());
    }
}
