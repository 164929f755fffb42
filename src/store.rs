//! Typed table handles over the local SQLite store.
//!
//! Every synchronized entity lives in its own table with the same structural
//! contract: a local `id` (AUTOINCREMENT primary key, never sent to the
//! cloud) and a nullable `remote_id` (the cloud document id, the only
//! cross-store linkage). Rows cross the command and sync boundaries as
//! `serde_json::Value` objects with camelCase keys (the wire shape of the
//! cloud collection store), and each table declares its column mapping once
//! in a descriptor list below.

use rusqlite::{params, types::Value as SqlValue, Connection, OptionalExtension};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Table registry
// ---------------------------------------------------------------------------

/// One synchronized logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Businesses,
    Categories,
    Parties,
    Items,
    Staff,
    Transactions,
    Settings,
}

/// Fixed processing order for a sync pass. Tables are reconciled
/// independently; this order is stable, not a dependency graph.
pub const SYNC_ORDER: [Table; 7] = [
    Table::Businesses,
    Table::Categories,
    Table::Parties,
    Table::Items,
    Table::Staff,
    Table::Transactions,
    Table::Settings,
];

/// How a column is stored in SQLite and coerced from/to JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Real,
    Integer,
    Bool,
    /// ISO-8601 text. Stored verbatim; outbound normalization is the sync
    /// engine's job.
    Date,
    /// Arbitrary JSON serialized into a TEXT column.
    Json,
}

/// One entity column: camelCase wire key, snake_case SQLite column.
pub struct Column {
    pub json_key: &'static str,
    pub sql_name: &'static str,
    pub kind: ColumnKind,
}

const fn col(json_key: &'static str, sql_name: &'static str, kind: ColumnKind) -> Column {
    Column {
        json_key,
        sql_name,
        kind,
    }
}

const BUSINESS_COLUMNS: &[Column] = &[
    col("name", "name", ColumnKind::Text),
    col("currency", "currency", ColumnKind::Text),
    col("phone", "phone", ColumnKind::Text),
    col("email", "email", ColumnKind::Text),
    col("address", "address", ColumnKind::Text),
    col("logo", "logo", ColumnKind::Text),
];

const CATEGORY_COLUMNS: &[Column] = &[
    col("businessId", "business_id", ColumnKind::Integer),
    col("name", "name", ColumnKind::Text),
    col("type", "type", ColumnKind::Text),
];

const PARTY_COLUMNS: &[Column] = &[
    col("businessId", "business_id", ColumnKind::Integer),
    col("name", "name", ColumnKind::Text),
    col("phone", "phone", ColumnKind::Text),
    col("type", "type", ColumnKind::Text),
];

const ITEM_COLUMNS: &[Column] = &[
    col("businessId", "business_id", ColumnKind::Integer),
    col("name", "name", ColumnKind::Text),
    col("stock", "stock", ColumnKind::Real),
    col("minStock", "min_stock", ColumnKind::Real),
    col("unit", "unit", ColumnKind::Text),
    col("price", "price", ColumnKind::Real),
    col("costPrice", "cost_price", ColumnKind::Real),
];

const STAFF_COLUMNS: &[Column] = &[
    col("businessId", "business_id", ColumnKind::Integer),
    col("name", "name", ColumnKind::Text),
    col("phone", "phone", ColumnKind::Text),
    col("role", "role", ColumnKind::Text),
    col("salary", "salary", ColumnKind::Real),
];

const TRANSACTION_COLUMNS: &[Column] = &[
    col("businessId", "business_id", ColumnKind::Integer),
    col("amount", "amount", ColumnKind::Real),
    col("type", "type", ColumnKind::Text),
    col("category", "category", ColumnKind::Text),
    col("remark", "remark", ColumnKind::Text),
    col("date", "date", ColumnKind::Date),
    col("paymentMode", "payment_mode", ColumnKind::Text),
    col("isCredit", "is_credit", ColumnKind::Bool),
    col("dueDate", "due_date", ColumnKind::Date),
    col("partyId", "party_id", ColumnKind::Integer),
    col("staffId", "staff_id", ColumnKind::Integer),
    col("items", "items", ColumnKind::Json),
    col("receiptImage", "receipt_image", ColumnKind::Text),
];

const SETTINGS_COLUMNS: &[Column] = &[
    col("businessId", "business_id", ColumnKind::Integer),
    col("backupEnabled", "backup_enabled", ColumnKind::Bool),
    col("privacyEnabled", "privacy_enabled", ColumnKind::Bool),
    col("lastBackupDate", "last_backup_date", ColumnKind::Date),
];

impl Table {
    /// SQLite table name.
    pub fn sql_table(&self) -> &'static str {
        match self {
            Table::Businesses => "businesses",
            Table::Categories => "categories",
            Table::Parties => "parties",
            Table::Items => "items",
            Table::Staff => "staff",
            Table::Transactions => "transactions",
            Table::Settings => "settings",
        }
    }

    /// Cloud collection id. Collections are named after the tables.
    pub fn collection(&self) -> &'static str {
        self.sql_table()
    }

    /// Entity column descriptors (excludes `id` and `remote_id`, which every
    /// table carries and which are handled explicitly).
    pub fn columns(&self) -> &'static [Column] {
        match self {
            Table::Businesses => BUSINESS_COLUMNS,
            Table::Categories => CATEGORY_COLUMNS,
            Table::Parties => PARTY_COLUMNS,
            Table::Items => ITEM_COLUMNS,
            Table::Staff => STAFF_COLUMNS,
            Table::Transactions => TRANSACTION_COLUMNS,
            Table::Settings => SETTINGS_COLUMNS,
        }
    }

}

// ---------------------------------------------------------------------------
// JSON <-> SQL coercion
// ---------------------------------------------------------------------------

/// Convert a JSON field into an owned SQLite value according to the column
/// kind. Missing keys and JSON nulls both map to SQL NULL.
fn bind_json(kind: ColumnKind, value: Option<&Value>) -> SqlValue {
    let Some(v) = value else {
        return SqlValue::Null;
    };
    if v.is_null() {
        return SqlValue::Null;
    }
    match kind {
        ColumnKind::Text | ColumnKind::Date => match v.as_str() {
            Some(s) => SqlValue::Text(s.to_string()),
            None => SqlValue::Text(v.to_string()),
        },
        ColumnKind::Real => match v.as_f64() {
            Some(f) => SqlValue::Real(f),
            None => SqlValue::Null,
        },
        ColumnKind::Integer => match v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)) {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Null,
        },
        ColumnKind::Bool => {
            let flag = v
                .as_bool()
                .or_else(|| v.as_i64().map(|i| i != 0))
                .unwrap_or(false);
            SqlValue::Integer(if flag { 1 } else { 0 })
        }
        ColumnKind::Json => match v {
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        },
    }
}

/// Convert a raw SQLite value back into the JSON field shape. Returns `None`
/// for SQL NULL so absent fields stay absent in the row object.
fn json_from_sql(kind: ColumnKind, raw: SqlValue) -> Option<Value> {
    match (kind, raw) {
        (_, SqlValue::Null) => None,
        (ColumnKind::Text | ColumnKind::Date, SqlValue::Text(s)) => Some(Value::String(s)),
        (ColumnKind::Real, SqlValue::Real(f)) => serde_json::Number::from_f64(f).map(Value::Number),
        (ColumnKind::Real, SqlValue::Integer(i)) => {
            serde_json::Number::from_f64(i as f64).map(Value::Number)
        }
        (ColumnKind::Integer, SqlValue::Integer(i)) => Some(Value::Number(i.into())),
        (ColumnKind::Bool, SqlValue::Integer(i)) => Some(Value::Bool(i != 0)),
        (ColumnKind::Json, SqlValue::Text(s)) => {
            Some(serde_json::from_str(&s).unwrap_or(Value::String(s)))
        }
        // Unexpected storage class; surface it as text rather than dropping it.
        (_, SqlValue::Text(s)) => Some(Value::String(s)),
        (_, SqlValue::Integer(i)) => Some(Value::Number(i.into())),
        (_, SqlValue::Real(f)) => serde_json::Number::from_f64(f).map(Value::Number),
        (_, SqlValue::Blob(_)) => None,
    }
}

fn select_sql(table: Table) -> String {
    let cols: Vec<&str> = table.columns().iter().map(|c| c.sql_name).collect();
    format!(
        "SELECT id, remote_id, {} FROM {}",
        cols.join(", "),
        table.sql_table()
    )
}

fn row_to_value(table: Table, row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let mut obj = Map::new();
    let id: i64 = row.get(0)?;
    obj.insert("id".into(), Value::Number(id.into()));
    if let Some(remote_id) = row.get::<_, Option<String>>(1)? {
        obj.insert("remoteId".into(), Value::String(remote_id));
    }
    for (idx, column) in table.columns().iter().enumerate() {
        let raw: SqlValue = row.get(idx + 2)?;
        if let Some(v) = json_from_sql(column.kind, raw) {
            obj.insert(column.json_key.into(), v);
        }
    }
    Ok(Value::Object(obj))
}

// ---------------------------------------------------------------------------
// Row operations
// ---------------------------------------------------------------------------

/// Read every row of a table as JSON objects, oldest first.
pub fn get_all(conn: &Connection, table: Table) -> Result<Vec<Value>, String> {
    let sql = format!("{} ORDER BY id", select_sql(table));
    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| row_to_value(table, row))
        .map_err(|e| e.to_string())?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| format!("read {}: {e}", table.sql_table()))?;
    Ok(rows)
}

/// Read rows belonging to one business. For the businesses table itself this
/// returns the single matching row.
pub fn get_all_for_business(
    conn: &Connection,
    table: Table,
    business_id: i64,
) -> Result<Vec<Value>, String> {
    let filter = if table == Table::Businesses {
        "id"
    } else {
        "business_id"
    };
    let sql = format!("{} WHERE {} = ?1 ORDER BY id", select_sql(table), filter);
    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![business_id], |row| row_to_value(table, row))
        .map_err(|e| e.to_string())?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| format!("read {}: {e}", table.sql_table()))?;
    Ok(rows)
}

/// Fetch one row by local id.
pub fn get(conn: &Connection, table: Table, local_id: i64) -> Result<Option<Value>, String> {
    let sql = format!("{} WHERE id = ?1", select_sql(table));
    conn.query_row(&sql, params![local_id], |row| row_to_value(table, row))
        .optional()
        .map_err(|e| format!("get {}: {e}", table.sql_table()))
}

/// Fetch the row whose `remote_id` equals the given cloud document id.
pub fn find_one_by_remote_id(
    conn: &Connection,
    table: Table,
    remote_id: &str,
) -> Result<Option<Value>, String> {
    let sql = format!("{} WHERE remote_id = ?1 LIMIT 1", select_sql(table));
    conn.query_row(&sql, params![remote_id], |row| row_to_value(table, row))
        .optional()
        .map_err(|e| format!("find by remote id in {}: {e}", table.sql_table()))
}

/// Insert a JSON row and return the freshly assigned local id. Unknown keys
/// are ignored; a present `remoteId` is persisted; any `id` key is ignored
/// (local ids are always store-assigned).
pub fn insert(conn: &Connection, table: Table, row: &Value) -> Result<i64, String> {
    let columns = table.columns();
    let mut names: Vec<&str> = vec!["remote_id"];
    let mut values: Vec<SqlValue> = vec![bind_json(ColumnKind::Text, row.get("remoteId"))];
    for column in columns {
        names.push(column.sql_name);
        values.push(bind_json(column.kind, row.get(column.json_key)));
    }

    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.sql_table(),
        names.join(", "),
        placeholders.join(", ")
    );
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| format!("insert into {}: {e}", table.sql_table()))?;
    Ok(conn.last_insert_rowid())
}

/// Update a row by local id. Only keys present in `fields` are written
/// (explicit JSON nulls clear the column), so callers can do partial edits
/// or, by passing a full document, a wholesale overwrite. The local id
/// itself is never modified.
pub fn update_by_local_id(
    conn: &Connection,
    table: Table,
    local_id: i64,
    fields: &Value,
) -> Result<(), String> {
    let obj = fields
        .as_object()
        .ok_or_else(|| format!("update {}: payload must be an object", table.sql_table()))?;

    let mut assignments: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();

    if obj.contains_key("remoteId") {
        values.push(bind_json(ColumnKind::Text, obj.get("remoteId")));
        assignments.push(format!("remote_id = ?{}", values.len()));
    }
    for column in table.columns() {
        if obj.contains_key(column.json_key) {
            values.push(bind_json(column.kind, obj.get(column.json_key)));
            assignments.push(format!("{} = ?{}", column.sql_name, values.len()));
        }
    }

    if assignments.is_empty() {
        return Ok(());
    }

    values.push(SqlValue::Integer(local_id));
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{}",
        table.sql_table(),
        assignments.join(", "),
        values.len()
    );
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| format!("update {}: {e}", table.sql_table()))?;
    Ok(())
}

/// Persist the cloud document id assigned by a successful first push.
pub fn set_remote_id(
    conn: &Connection,
    table: Table,
    local_id: i64,
    remote_id: &str,
) -> Result<(), String> {
    conn.execute(
        &format!("UPDATE {} SET remote_id = ?1 WHERE id = ?2", table.sql_table()),
        params![remote_id, local_id],
    )
    .map_err(|e| format!("set remote id on {}: {e}", table.sql_table()))?;
    Ok(())
}

/// Delete a row by local id. Local-only; deletions are not propagated to the
/// cloud store.
pub fn delete(conn: &Connection, table: Table, local_id: i64) -> Result<(), String> {
    conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", table.sql_table()),
        params![local_id],
    )
    .map_err(|e| format!("delete from {}: {e}", table.sql_table()))?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        conn
    }

    #[test]
    fn test_insert_and_read_back_transaction_row() {
        let conn = test_conn();
        let row = serde_json::json!({
            "businessId": 1,
            "amount": 250.5,
            "type": "OUT",
            "category": "Transport",
            "remark": "Fuel",
            "date": "2026-07-01T09:30:00Z",
            "paymentMode": "Cash",
            "isCredit": true,
            "dueDate": "2026-07-15T00:00:00Z",
            "partyId": 3,
            "items": [{ "itemId": 2, "qty": 1, "price": 250.5 }],
        });

        let id = insert(&conn, Table::Transactions, &row).expect("insert");
        let stored = get(&conn, Table::Transactions, id)
            .expect("get")
            .expect("row present");

        assert_eq!(stored["id"], serde_json::json!(id));
        assert_eq!(stored["amount"], serde_json::json!(250.5));
        assert_eq!(stored["type"], serde_json::json!("OUT"));
        assert_eq!(stored["isCredit"], serde_json::json!(true));
        assert_eq!(stored["items"][0]["itemId"], serde_json::json!(2));
        // No remote id until a push assigns one
        assert!(stored.get("remoteId").is_none());
    }

    #[test]
    fn test_insert_ignores_unknown_keys_and_local_id() {
        let conn = test_conn();
        let row = serde_json::json!({
            "id": 9999,
            "name": "Main Shop",
            "currency": "KES",
            "somethingServerSide": "ignored",
        });

        let id = insert(&conn, Table::Businesses, &row).expect("insert");
        assert_ne!(id, 9999);
        let stored = get(&conn, Table::Businesses, id).unwrap().unwrap();
        assert_eq!(stored["name"], serde_json::json!("Main Shop"));
        assert!(stored.get("somethingServerSide").is_none());
    }

    #[test]
    fn test_partial_update_leaves_other_columns() {
        let conn = test_conn();
        let id = insert(
            &conn,
            Table::Items,
            &serde_json::json!({ "businessId": 1, "name": "Rice", "stock": 10.0, "price": 55.0 }),
        )
        .unwrap();

        update_by_local_id(&conn, Table::Items, id, &serde_json::json!({ "stock": 7.0 })).unwrap();

        let stored = get(&conn, Table::Items, id).unwrap().unwrap();
        assert_eq!(stored["stock"], serde_json::json!(7.0));
        assert_eq!(stored["price"], serde_json::json!(55.0));
        assert_eq!(stored["name"], serde_json::json!("Rice"));
    }

    #[test]
    fn test_update_with_explicit_null_clears_column() {
        let conn = test_conn();
        let id = insert(
            &conn,
            Table::Transactions,
            &serde_json::json!({ "businessId": 1, "amount": 10.0, "type": "IN", "remark": "x" }),
        )
        .unwrap();

        update_by_local_id(
            &conn,
            Table::Transactions,
            id,
            &serde_json::json!({ "remark": null }),
        )
        .unwrap();

        let stored = get(&conn, Table::Transactions, id).unwrap().unwrap();
        assert!(stored.get("remark").is_none());
    }

    #[test]
    fn test_find_one_by_remote_id() {
        let conn = test_conn();
        let id = insert(
            &conn,
            Table::Parties,
            &serde_json::json!({ "businessId": 1, "name": "Asha", "type": "CUSTOMER" }),
        )
        .unwrap();

        assert!(find_one_by_remote_id(&conn, Table::Parties, "doc-1")
            .unwrap()
            .is_none());

        set_remote_id(&conn, Table::Parties, id, "doc-1").unwrap();

        let found = find_one_by_remote_id(&conn, Table::Parties, "doc-1")
            .unwrap()
            .expect("row linked to doc-1");
        assert_eq!(found["id"], serde_json::json!(id));
        assert_eq!(found["remoteId"], serde_json::json!("doc-1"));
    }

    #[test]
    fn test_get_all_for_business_filters_rows() {
        let conn = test_conn();
        for (biz, name) in [(1, "Sales"), (1, "Rent"), (2, "Food")] {
            insert(
                &conn,
                Table::Categories,
                &serde_json::json!({ "businessId": biz, "name": name, "type": "BOTH" }),
            )
            .unwrap();
        }

        let rows = get_all_for_business(&conn, Table::Categories, 1).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["businessId"] == serde_json::json!(1)));
    }
}
