//! Local SQLite database layer for The Small Books.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations and the managed
//! connection state shared across Tauri commands and the sync engine. Every
//! synchronized table carries a local `id` (AUTOINCREMENT, never transmitted)
//! and a nullable `remote_id` (the cloud document id, set on first push).

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Tauri managed state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{app_data_dir}/books.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(app_data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(app_data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = app_data_dir.join("books.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: ledger tables.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- businesses (tenant root)
        CREATE TABLE IF NOT EXISTS businesses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            remote_id TEXT,
            name TEXT NOT NULL,
            currency TEXT NOT NULL DEFAULT 'NGN',
            phone TEXT,
            email TEXT,
            address TEXT,
            logo TEXT
        );

        -- categories (tenant-scoped cash-flow buckets)
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            remote_id TEXT,
            business_id INTEGER,
            name TEXT NOT NULL,
            type TEXT NOT NULL DEFAULT 'BOTH' CHECK (type IN ('IN', 'OUT', 'BOTH'))
        );

        -- parties (customers and suppliers)
        CREATE TABLE IF NOT EXISTS parties (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            remote_id TEXT,
            business_id INTEGER,
            name TEXT NOT NULL,
            phone TEXT,
            type TEXT NOT NULL DEFAULT 'CUSTOMER' CHECK (type IN ('CUSTOMER', 'SUPPLIER'))
        );

        -- items (inventory)
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            remote_id TEXT,
            business_id INTEGER,
            name TEXT NOT NULL,
            stock REAL NOT NULL DEFAULT 0,
            min_stock REAL DEFAULT 0,
            unit TEXT DEFAULT 'pcs',
            price REAL NOT NULL DEFAULT 0,
            cost_price REAL DEFAULT 0
        );

        -- staff
        CREATE TABLE IF NOT EXISTS staff (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            remote_id TEXT,
            business_id INTEGER,
            name TEXT NOT NULL,
            phone TEXT,
            role TEXT NOT NULL DEFAULT 'OPERATOR' CHECK (role IN ('ADMIN', 'OPERATOR')),
            salary REAL
        );

        -- transactions (the ledger itself)
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            remote_id TEXT,
            business_id INTEGER,
            amount REAL NOT NULL DEFAULT 0,
            type TEXT NOT NULL DEFAULT 'IN' CHECK (type IN ('IN', 'OUT')),
            category TEXT,
            remark TEXT,
            date TEXT,
            payment_mode TEXT DEFAULT 'Cash',
            is_credit INTEGER NOT NULL DEFAULT 0,
            due_date TEXT,
            party_id INTEGER,
            staff_id INTEGER,
            items TEXT DEFAULT '[]',
            receipt_image TEXT
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_businesses_remote_id ON businesses(remote_id);
        CREATE INDEX IF NOT EXISTS idx_categories_remote_id ON categories(remote_id);
        CREATE INDEX IF NOT EXISTS idx_categories_business ON categories(business_id);
        CREATE INDEX IF NOT EXISTS idx_parties_remote_id ON parties(remote_id);
        CREATE INDEX IF NOT EXISTS idx_parties_business ON parties(business_id);
        CREATE INDEX IF NOT EXISTS idx_items_remote_id ON items(remote_id);
        CREATE INDEX IF NOT EXISTS idx_items_business ON items(business_id);
        CREATE INDEX IF NOT EXISTS idx_staff_remote_id ON staff(remote_id);
        CREATE INDEX IF NOT EXISTS idx_staff_business ON staff(business_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_remote_id ON transactions(remote_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_business ON transactions(business_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
        CREATE INDEX IF NOT EXISTS idx_transactions_due_date ON transactions(due_date);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: per-tenant settings.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            remote_id TEXT,
            business_id INTEGER,
            backup_enabled INTEGER NOT NULL DEFAULT 0,
            privacy_enabled INTEGER NOT NULL DEFAULT 0,
            last_backup_date TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_settings_remote_id ON settings(remote_id);
        CREATE INDEX IF NOT EXISTS idx_settings_business ON settings(business_id);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2");
    Ok(())
}

/// Test helper: run migrations against an arbitrary (usually in-memory)
/// connection, panicking on failure.
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .expect("pragma setup");
        conn
    }

    #[test]
    fn test_migrations_create_all_tables() {
        let conn = memory_conn();
        run_migrations_for_test(&conn);

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        for expected in [
            "businesses",
            "categories",
            "items",
            "parties",
            "settings",
            "staff",
            "transactions",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = memory_conn();
        run_migrations_for_test(&conn);
        run_migrations_for_test(&conn);

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        // Running twice must not duplicate version rows
        let rows: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, CURRENT_SCHEMA_VERSION);
    }
}
