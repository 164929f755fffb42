//! Tenant (business) context.
//!
//! Every ledger row belongs to exactly one business. The active selection is
//! persisted in the OS keyring, outside the database, so it survives a
//! reload and a database restore. Creating a business seeds its default
//! cash-flow categories inside the same SQLite transaction: a business with
//! no categories breaks the transaction entry screens, so both rows land or
//! neither does.

use serde_json::Value;
use tracing::info;

use crate::db::DbState;
use crate::storage;
use crate::store::{self, Table};

pub const DEFAULT_BUSINESS_NAME: &str = "Shop #1";
pub const DEFAULT_CURRENCY: &str = "NGN";

/// Categories every new business starts with.
const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("Sales", "IN"),
    ("Food", "OUT"),
    ("Transport", "OUT"),
    ("Rent", "OUT"),
    ("Salary", "OUT"),
    ("Utilities", "OUT"),
    ("Other", "BOTH"),
];

/// The persisted active-business selection, if any.
pub fn active_business_id() -> Option<i64> {
    storage::get_credential(storage::KEY_ACTIVE_BUSINESS_ID).and_then(|s| s.parse().ok())
}

/// Make `business_id` the active tenant. Fails when no such row exists.
pub fn switch_business(db: &DbState, business_id: i64) -> Result<Value, String> {
    let row = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        store::get(&conn, Table::Businesses, business_id)?
    }
    .ok_or_else(|| format!("No business with id {business_id}"))?;

    storage::set_credential(storage::KEY_ACTIVE_BUSINESS_ID, &business_id.to_string())?;
    info!(business_id, "switched active business");
    Ok(row)
}

/// The active business row. Falls back to the first business (persisting
/// that choice) when nothing is selected yet or the selection points at a
/// row that no longer exists.
pub fn current_business(db: &DbState) -> Result<Option<Value>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    if let Some(id) = active_business_id() {
        if let Some(row) = store::get(&conn, Table::Businesses, id)? {
            return Ok(Some(row));
        }
    }

    let first = store::get_all(&conn, Table::Businesses)?.into_iter().next();
    if let Some(row) = &first {
        if let Some(id) = row.get("id").and_then(Value::as_i64) {
            let _ = storage::set_credential(storage::KEY_ACTIVE_BUSINESS_ID, &id.to_string());
        }
    }
    Ok(first)
}

/// Create a business and seed its default categories, all-or-nothing.
pub fn create_business(db: &DbState, name: &str, currency: &str) -> Result<Value, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Business name is required".into());
    }
    let currency = if currency.trim().is_empty() {
        DEFAULT_CURRENCY
    } else {
        currency.trim()
    };

    let mut conn = db.conn.lock().map_err(|e| e.to_string())?;
    let business_id =
        create_business_with_categories(&mut conn, name, currency, DEFAULT_CATEGORIES)?;
    drop(conn);

    info!(business_id, name, "created business");

    // First business created becomes the active one.
    if active_business_id().is_none() {
        let _ = storage::set_credential(storage::KEY_ACTIVE_BUSINESS_ID, &business_id.to_string());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    store::get(&conn, Table::Businesses, business_id)?
        .ok_or_else(|| "created business row missing".to_string())
}

fn create_business_with_categories(
    conn: &mut rusqlite::Connection,
    name: &str,
    currency: &str,
    categories: &[(&str, &str)],
) -> Result<i64, String> {
    let tx = conn
        .transaction()
        .map_err(|e| format!("begin business create: {e}"))?;

    let business_id = store::insert(
        &tx,
        Table::Businesses,
        &serde_json::json!({ "name": name, "currency": currency }),
    )?;
    for (cat_name, cat_type) in categories {
        store::insert(
            &tx,
            Table::Categories,
            &serde_json::json!({
                "businessId": business_id,
                "name": cat_name,
                "type": cat_type,
            }),
        )?;
    }

    tx.commit().map_err(|e| format!("commit business create: {e}"))?;
    Ok(business_id)
}

/// First-run seeding: make sure at least one business exists so the app is
/// usable before any cloud interaction.
pub fn ensure_default_business(db: &DbState) -> Result<(), String> {
    let is_empty = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        store::get_all(&conn, Table::Businesses)?.is_empty()
    };
    if is_empty {
        create_business(db, DEFAULT_BUSINESS_NAME, DEFAULT_CURRENCY)?;
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        conn
    }

    #[test]
    fn test_create_seeds_default_categories() {
        let mut conn = test_conn();
        let business_id =
            create_business_with_categories(&mut conn, "Shop #1", "NGN", DEFAULT_CATEGORIES)
                .expect("create business");

        let categories = store::get_all_for_business(&conn, Table::Categories, business_id)
            .expect("read categories");
        assert_eq!(categories.len(), DEFAULT_CATEGORIES.len());
        assert!(categories
            .iter()
            .any(|c| c["name"] == serde_json::json!("Sales") && c["type"] == serde_json::json!("IN")));
    }

    #[test]
    fn test_create_rolls_back_when_seeding_fails() {
        let mut conn = test_conn();
        // The flow-direction CHECK rejects the last category, after the
        // business row and several categories were already inserted.
        let bad: &[(&str, &str)] = &[("Sales", "IN"), ("Broken", "SIDEWAYS")];
        let result = create_business_with_categories(&mut conn, "Doomed", "NGN", bad);
        assert!(result.is_err());

        let businesses = store::get_all(&conn, Table::Businesses).unwrap();
        let categories = store::get_all(&conn, Table::Categories).unwrap();
        assert!(businesses.is_empty(), "business row must not survive");
        assert!(categories.is_empty(), "partial categories must not survive");
    }
}
