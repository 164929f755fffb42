#![recursion_limit = "256"]

//! The Small Books - Tauri v2 Backend
//!
//! Offline-first bookkeeping: the frontend talks to the local SQLite store
//! through the IPC commands registered here, and the sync engine reconciles
//! that store against the user's cloud collections on login and whenever
//! connectivity returns.

use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod auth;
mod backup;
mod business;
mod commands;
mod db;
mod remote;
mod storage;
mod store;
mod sync;

/// Connectivity probe interval for the network watcher (seconds). The
/// watcher only fires a sync on an offline-to-online transition; this is
/// not a periodic sync timer.
const NETWORK_WATCH_INTERVAL_SECS: u64 = 15;

/// Log files older than this many days are pruned at startup.
const LOG_RETENTION_DAYS: u64 = 7;

fn get_log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("com.thesmall.books").join("logs")
}

/// Delete rolled log files past the retention window.
fn prune_old_logs() {
    let log_dir = get_log_dir();
    let Ok(entries) = fs::read_dir(&log_dir) else {
        return;
    };
    let cutoff = std::time::SystemTime::now()
        - std::time::Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);
    for entry in entries.flatten() {
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("books."))
            .unwrap_or(false);
        if !is_log {
            continue;
        }
        let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
        if matches!(modified, Some(m) if m < cutoff) {
            let _ = fs::remove_file(&path);
        }
    }
}

pub fn run() {
    // Initialize structured logging (console + rolling file)
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,the_small_books_lib=debug"));

    prune_old_logs();

    let log_dir = get_log_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "books");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive for the lifetime of the app — dropping it flushes logs.
    // We leak it intentionally since the app runs until process exit.
    std::mem::forget(_guard);

    info!("Starting The Small Books v{}", env!("CARGO_PKG_VERSION"));

    tauri::Builder::default()
        .setup(|app| {
            use std::sync::Arc;
            use tauri::Manager;

            let app_data_dir = app
                .path()
                .app_data_dir()
                .expect("Failed to get app data dir");

            // Main DB connection for Tauri commands
            let db_state = db::init(&app_data_dir).expect("Failed to initialize database");
            if let Err(e) = business::ensure_default_business(&db_state) {
                warn!(error = %e, "first-run business seeding failed");
            }
            app.manage(db_state);

            // Sync state (shared between commands and the network watcher)
            let sync_state = Arc::new(sync::SyncState::new());
            app.manage(sync_state.clone());

            // Second DB connection for the network watcher's sync passes
            let db_for_watcher =
                Arc::new(db::init(&app_data_dir).expect("Failed to init watcher database"));
            sync::start_network_watcher(
                app.handle().clone(),
                db_for_watcher,
                sync_state,
                NETWORK_WATCH_INTERVAL_SECS,
            );

            info!("Database, tenant context, and network watcher registered");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Account / session
            commands::auth::account_login,
            commands::auth::account_logout,
            commands::auth::account_get_session,
            commands::auth::cloud_get_config,
            commands::auth::cloud_update_config,
            commands::auth::cloud_factory_reset,
            // Businesses (tenant context)
            commands::business::business_get_all,
            commands::business::business_get_current,
            commands::business::business_switch,
            commands::business::business_create,
            commands::business::business_update,
            // Categories
            commands::records::category_get_all,
            commands::records::category_create,
            commands::records::category_update,
            commands::records::category_delete,
            // Parties
            commands::records::party_get_all,
            commands::records::party_create,
            commands::records::party_update,
            commands::records::party_delete,
            // Staff
            commands::records::staff_get_all,
            commands::records::staff_create,
            commands::records::staff_update,
            commands::records::staff_delete,
            // Items
            commands::records::item_get_all,
            commands::records::item_create,
            commands::records::item_update,
            commands::records::item_delete,
            // Transactions
            commands::records::transaction_get_all,
            commands::records::transaction_create,
            commands::records::transaction_update,
            commands::records::transaction_delete,
            // Settings
            commands::records::settings_get,
            commands::records::settings_update,
            // Sync
            commands::sync::sync_force,
            commands::sync::sync_get_status,
            commands::sync::network_get_status,
            // Backup
            commands::backup::backup_export,
            commands::backup::backup_restore,
        ])
        .run(tauri::generate_context!())
        .expect("error while running The Small Books");
}
