//! Local-remote synchronization engine for The Small Books.
//!
//! Reconciles every ledger table between the local SQLite store and the
//! per-user cloud collections in two phases per table: push local rows
//! (create or update by cloud document id), then pull the user's documents
//! back (insert or overwrite by cloud document id). A single advisory
//! in-flight flag prevents overlapping passes; a pass is triggered on login
//! and whenever connectivity returns, never on a timer.
//!
//! Per-record push failures are logged and skipped so one bad row cannot
//! stall the ledger; a failure listing a collection (service unreachable)
//! aborts the remainder of the pass and is surfaced to the user once.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tauri::{AppHandle, Emitter};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{CloudClient, RECEIPTS_BUCKET};
use crate::auth;
use crate::db::DbState;
use crate::remote::RemoteStore;
use crate::store::{self, ColumnKind, Table, SYNC_ORDER};

/// Server-side metadata fields stripped from pulled documents before they
/// are written into local rows.
const SERVER_METADATA_KEYS: &[&str] = &[
    "$id",
    "$collectionId",
    "$databaseId",
    "$createdAt",
    "$updatedAt",
    "$permissions",
    "$sequence",
    "userId",
];

/// Message shown to the user when a pass dies for systemic reasons.
pub const SYNC_FAILED_MESSAGE: &str = "Sync failed. Please check your connection.";

// ---------------------------------------------------------------------------
// Sync engine state (managed by Tauri)
// ---------------------------------------------------------------------------

/// Managed state shared between commands and the network watcher.
///
/// `in_flight` is the advisory single-flight flag: process-local only, so
/// two OS processes on the same database can still race. `last_synced` is
/// the wall-clock stamp of the last fully successful pass; it lives in
/// memory and resets on logout.
pub struct SyncState {
    pub in_flight: Arc<AtomicBool>,
    pub last_synced: Arc<Mutex<Option<String>>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
            last_synced: Arc::new(Mutex::new(None)),
        }
    }

    /// Forget sync history (logout).
    pub fn reset(&self) {
        if let Ok(mut guard) = self.last_synced.lock() {
            *guard = None;
        }
    }

    /// Read-only status snapshot for the frontend.
    pub fn status_json(&self, is_online: Option<bool>) -> Value {
        let last_synced = self
            .last_synced
            .lock()
            .ok()
            .and_then(|guard| guard.clone());
        serde_json::json!({
            "isSyncing": self.in_flight.load(Ordering::SeqCst),
            "lastSynced": last_synced,
            "isOnline": is_online,
        })
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// What a `sync()` invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A full pass ran to completion.
    Completed { pushed: usize, pulled: usize },
    /// Another pass was already in flight; nothing was done.
    SkippedInFlight,
    /// No authenticated session; nothing was done.
    SkippedNoSession,
}

impl SyncOutcome {
    pub fn to_json(self) -> Value {
        match self {
            SyncOutcome::Completed { pushed, pulled } => serde_json::json!({
                "status": "completed", "pushed": pushed, "pulled": pulled,
            }),
            SyncOutcome::SkippedInFlight => serde_json::json!({
                "status": "skipped", "reason": "in_flight",
            }),
            SyncOutcome::SkippedNoSession => serde_json::json!({
                "status": "skipped", "reason": "no_session",
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run one reconciliation pass for the authenticated session. No-op when
/// signed out or when a pass is already in flight.
pub async fn sync(
    db: &DbState,
    remote: &dyn RemoteStore,
    state: &SyncState,
) -> Result<SyncOutcome, String> {
    let Some(session) = auth::current_session() else {
        debug!("sync requested without a session; skipping");
        return Ok(SyncOutcome::SkippedNoSession);
    };
    sync_for_owner(db, remote, state, &session.user_id).await
}

/// Convenience wrapper building the production cloud client from stored
/// credentials.
pub async fn sync_with_stored_client(
    db: &DbState,
    state: &SyncState,
) -> Result<SyncOutcome, String> {
    let client = CloudClient::from_storage()?;
    sync(db, &client, state).await
}

/// Single-flight guard around one full pass. The flag is cleared exactly
/// once on every exit path so a later call can always proceed.
pub async fn sync_for_owner(
    db: &DbState,
    remote: &dyn RemoteStore,
    state: &SyncState,
    owner_id: &str,
) -> Result<SyncOutcome, String> {
    if state
        .in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!("sync already in flight; skipping");
        return Ok(SyncOutcome::SkippedInFlight);
    }

    info!("starting sync pass");
    let result = run_sync_pass(db, remote, owner_id).await;

    if result.is_ok() {
        if let Ok(mut guard) = state.last_synced.lock() {
            *guard = Some(Utc::now().to_rfc3339());
        }
    }
    state.in_flight.store(false, Ordering::SeqCst);

    match result {
        Ok((pushed, pulled)) => {
            info!(pushed, pulled, "sync pass complete");
            Ok(SyncOutcome::Completed { pushed, pulled })
        }
        Err(e) => {
            warn!(error = %e, "sync pass failed");
            Err(e)
        }
    }
}

/// One full pass: push then pull, per table, in fixed order. Tables are
/// reconciled independently, so a transaction may transiently reference a
/// party that only materializes on the next pass.
async fn run_sync_pass(
    db: &DbState,
    remote: &dyn RemoteStore,
    owner_id: &str,
) -> Result<(usize, usize), String> {
    let mut pushed = 0;
    let mut pulled = 0;
    for table in SYNC_ORDER {
        pushed += push_table(db, remote, table, owner_id).await?;
        pulled += pull_table(db, remote, table, owner_id).await?;
    }
    Ok((pushed, pulled))
}

// ---------------------------------------------------------------------------
// Push phase
// ---------------------------------------------------------------------------

/// Push every local row of one table. The whole table is pushed, not just
/// the active business; each row carries its own tenant reference.
/// Individual record failures are logged and skipped; reading the local
/// table failing is fatal to the pass.
async fn push_table(
    db: &DbState,
    remote: &dyn RemoteStore,
    table: Table,
    owner_id: &str,
) -> Result<usize, String> {
    let rows = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        store::get_all(&conn, table)?
    };

    let mut pushed = 0;
    for row in rows {
        let Some(local_id) = row.get("id").and_then(Value::as_i64) else {
            warn!(table = table.sql_table(), "row missing local id; skipping");
            continue;
        };
        let remote_id = row
            .get("remoteId")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut payload = outbound_payload(&row, owner_id);
        if table == Table::Transactions {
            promote_receipt_attachment(db, remote, local_id, &mut payload).await;
        }
        normalize_date_fields(table, &mut payload);

        let push_result = match &remote_id {
            Some(rid) => remote
                .update_document(table.collection(), rid, &payload)
                .await
                .map(|_| None),
            None => remote
                .create_document(table.collection(), &Uuid::new_v4().to_string(), &payload)
                .await
                .map(|doc| {
                    doc.get("$id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                }),
        };

        match push_result {
            Ok(assigned) => {
                if remote_id.is_none() {
                    // Persist the server id immediately so a retry after a
                    // dropped response becomes an update, not a second create.
                    let Some(rid) = assigned else {
                        warn!(
                            table = table.sql_table(),
                            local_id, "create response missing $id; record left pending"
                        );
                        continue;
                    };
                    let conn = db.conn.lock().map_err(|e| e.to_string())?;
                    store::set_remote_id(&conn, table, local_id, &rid)?;
                }
                pushed += 1;
            }
            Err(e) => {
                // A rejected record is skipped; an unreachable service dooms
                // the whole pass, so stop issuing calls.
                if e.is_network() {
                    return Err(format!("push {}: {e}", table.collection()));
                }
                warn!(
                    table = table.sql_table(),
                    local_id,
                    error = %e,
                    "record push failed; will retry on next pass"
                );
            }
        }
    }
    Ok(pushed)
}

/// Clone a local row into its outbound document shape: local and remote
/// identifiers are stripped (the store must never receive either) and the
/// session owner is attached.
fn outbound_payload(row: &Value, owner_id: &str) -> Value {
    let mut obj = row.as_object().cloned().unwrap_or_default();
    obj.remove("id");
    obj.remove("remoteId");
    obj.insert("userId".into(), Value::String(owner_id.to_string()));
    Value::Object(obj)
}

/// Rewrite date-valued fields to RFC 3339 timestamps before transmission.
/// Unparseable values are left untouched and will be rejected per-record by
/// the service rather than killing the pass.
fn normalize_date_fields(table: Table, payload: &mut Value) {
    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    for column in table.columns() {
        if column.kind != ColumnKind::Date {
            continue;
        }
        let normalized = obj
            .get(column.json_key)
            .and_then(Value::as_str)
            .and_then(normalize_date_string);
        if let Some(normalized) = normalized {
            obj.insert(column.json_key.into(), Value::String(normalized));
        }
    }
}

/// Parse the date shapes the UI produces (RFC 3339, bare date, bare
/// datetime) into a canonical UTC RFC 3339 string.
fn normalize_date_string(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).to_rfc3339());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc().to_rfc3339());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().to_rfc3339());
    }
    None
}

// ---------------------------------------------------------------------------
// Attachment upload path
// ---------------------------------------------------------------------------

/// True when the attachment field still holds inline binary data (a
/// data-URL) rather than an opaque storage reference.
fn is_inline_receipt_data(value: &str) -> bool {
    value.starts_with("data:")
}

/// Split a base64 data-URL into its mime type and decoded bytes.
fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>), String> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or("not a data url")?;
    let (header, encoded) = rest.split_once(',').ok_or("data url missing payload")?;
    let mime = header
        .split(';')
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    if !header.contains("base64") {
        return Err("data url is not base64-encoded".into());
    }
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64 payload: {e}"))?;
    Ok((mime, bytes))
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

/// Promote an inline receipt image to blob storage before the owning
/// transaction is pushed. On success the storage reference replaces the
/// inline data both in the outbound payload and in the local row (so a
/// later pass never re-uploads). On any failure the attachment is dropped
/// from this push — attachment loss is tolerated, record loss is not.
async fn promote_receipt_attachment(
    db: &DbState,
    remote: &dyn RemoteStore,
    local_id: i64,
    payload: &mut Value,
) {
    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    let Some(data_url) = obj
        .get("receiptImage")
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        return;
    };
    if !is_inline_receipt_data(&data_url) {
        return;
    }

    let (mime, bytes) = match decode_data_url(&data_url) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(local_id, error = %e, "malformed receipt data; pushing record without it");
            obj.remove("receiptImage");
            return;
        }
    };

    let file_id = Uuid::new_v4().to_string();
    let file_name = format!("receipt-{file_id}.{}", extension_for_mime(&mime));
    match remote
        .upload_blob(RECEIPTS_BUCKET, &file_id, &file_name, bytes, &mime)
        .await
    {
        Ok(stored_id) => {
            obj.insert("receiptImage".into(), Value::String(stored_id.clone()));
            // Persist the reference right away; an upload cannot be undone,
            // so the local row must stop holding the raw bytes now.
            match db.conn.lock() {
                Ok(conn) => {
                    if let Err(e) = store::update_by_local_id(
                        &conn,
                        Table::Transactions,
                        local_id,
                        &serde_json::json!({ "receiptImage": stored_id }),
                    ) {
                        warn!(local_id, error = %e, "failed to persist receipt reference");
                    }
                }
                Err(e) => warn!(local_id, error = %e, "failed to persist receipt reference"),
            }
        }
        Err(e) => {
            warn!(local_id, error = %e, "receipt upload failed; pushing record without it");
            obj.remove("receiptImage");
        }
    }
}

// ---------------------------------------------------------------------------
// Pull phase
// ---------------------------------------------------------------------------

/// Pull every document the user owns in one collection and reconcile it
/// into the local table: insert when the document id is unknown locally,
/// otherwise overwrite the matched row wholesale. Pulled data always wins;
/// there is no timestamp comparison.
async fn pull_table(
    db: &DbState,
    remote: &dyn RemoteStore,
    table: Table,
    owner_id: &str,
) -> Result<usize, String> {
    let docs = remote
        .list_documents(table.collection(), owner_id)
        .await
        .map_err(|e| format!("list {}: {e}", table.collection()))?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut pulled = 0;
    for doc in docs {
        let Some(remote_id) = doc.get("$id").and_then(Value::as_str) else {
            warn!(table = table.sql_table(), "pulled document missing $id; skipping");
            continue;
        };

        let payload = inbound_payload(&doc, remote_id);
        match store::find_one_by_remote_id(&conn, table, remote_id)? {
            Some(existing) => {
                let local_id = existing
                    .get("id")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| format!("local row in {} missing id", table.sql_table()))?;
                store::update_by_local_id(&conn, table, local_id, &payload)?;
            }
            None => {
                store::insert(&conn, table, &payload)?;
            }
        }
        pulled += 1;
    }
    Ok(pulled)
}

/// Build the local-shaped row from a pulled document: strip server
/// metadata, keep the document id as the row's remote id.
fn inbound_payload(doc: &Value, remote_id: &str) -> Value {
    let mut obj = doc.as_object().cloned().unwrap_or_default();
    for key in SERVER_METADATA_KEYS {
        obj.remove(*key);
    }
    obj.insert("remoteId".into(), Value::String(remote_id.to_string()));
    Value::Object(obj)
}

// ---------------------------------------------------------------------------
// Network watcher
// ---------------------------------------------------------------------------

/// Probe cloud reachability using the stored endpoint config.
pub async fn check_network_online() -> bool {
    match CloudClient::from_storage() {
        Ok(client) => client.is_reachable().await,
        Err(_) => false,
    }
}

/// Start the connectivity watcher. It probes reachability every
/// `interval_secs` and emits `network_status`; a sync pass is triggered
/// only on an offline-to-online transition (and on the first online probe
/// after startup, since the app may have launched already signed in),
/// never on a timer.
pub fn start_network_watcher(
    app: AppHandle,
    db: Arc<DbState>,
    state: Arc<SyncState>,
    interval_secs: u64,
) {
    tauri::async_runtime::spawn(async move {
        info!("network watcher started (interval: {interval_secs}s)");
        let mut previous_online: Option<bool> = None;

        loop {
            tokio::time::sleep(Duration::from_secs(interval_secs)).await;

            let is_online = check_network_online().await;
            let _ = app.emit(
                "network_status",
                serde_json::json!({ "isOnline": is_online }),
            );

            let restored = is_online && previous_online != Some(true);
            previous_online = Some(is_online);

            if !restored {
                continue;
            }
            info!("connectivity restored; triggering sync");

            match sync_with_stored_client(&db, &state).await {
                Ok(outcome) => {
                    debug!(?outcome, "watcher-triggered sync finished");
                }
                Err(e) => {
                    warn!(error = %e, "watcher-triggered sync failed");
                    let _ = app.emit(
                        "sync_failed",
                        serde_json::json!({ "message": SYNC_FAILED_MESSAGE }),
                    );
                }
            }
            let _ = app.emit("sync_status", state.status_json(Some(is_online)));
        }
    });
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::remote::RemoteError;
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicUsize;

    const OWNER: &str = "user-1";

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    /// In-memory stand-in for the cloud store. Documents are stored exactly
    /// as the engine pushed them, plus the server metadata a real pull
    /// would carry.
    #[derive(Default)]
    struct MockRemote {
        collections: Mutex<HashMap<String, Vec<Value>>>,
        create_calls: AtomicUsize,
        update_calls: AtomicUsize,
        list_calls: AtomicUsize,
        upload_calls: AtomicUsize,
        fail_update_ids: Mutex<HashSet<String>>,
        fail_uploads: AtomicBool,
        fail_lists: AtomicBool,
        offline: AtomicBool,
        list_delay_ms: AtomicUsize,
        pushed_payloads: Mutex<Vec<Value>>,
    }

    impl MockRemote {
        fn seed_document(&self, collection: &str, id: &str, mut data: Value) {
            let obj = data.as_object_mut().expect("seed data must be an object");
            obj.insert("$id".into(), Value::String(id.into()));
            obj.insert("$collectionId".into(), Value::String(collection.into()));
            obj.insert("$databaseId".into(), Value::String("books".into()));
            obj.insert("$createdAt".into(), Value::String("2026-01-01T00:00:00Z".into()));
            obj.insert("$updatedAt".into(), Value::String("2026-01-01T00:00:00Z".into()));
            obj.insert("$permissions".into(), serde_json::json!([]));
            self.collections
                .lock()
                .unwrap()
                .entry(collection.to_string())
                .or_default()
                .push(data);
        }

        fn documents(&self, collection: &str) -> Vec<Value> {
            self.collections
                .lock()
                .unwrap()
                .get(collection)
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl RemoteStore for MockRemote {
        async fn create_document(
            &self,
            collection: &str,
            document_id: &str,
            data: &Value,
        ) -> Result<Value, RemoteError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(RemoteError::Network("Cannot reach cloud store".into()));
            }
            self.pushed_payloads.lock().unwrap().push(data.clone());
            self.seed_document(collection, document_id, data.clone());
            Ok(self
                .documents(collection)
                .into_iter()
                .find(|d| d["$id"] == document_id)
                .unwrap())
        }

        async fn update_document(
            &self,
            collection: &str,
            document_id: &str,
            data: &Value,
        ) -> Result<Value, RemoteError> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            self.pushed_payloads.lock().unwrap().push(data.clone());
            if self.fail_update_ids.lock().unwrap().contains(document_id) {
                return Err(RemoteError::api(400, "Invalid document structure"));
            }
            let mut collections = self.collections.lock().unwrap();
            let docs = collections
                .entry(collection.to_string())
                .or_default();
            let Some(existing) = docs.iter_mut().find(|d| d["$id"] == document_id) else {
                return Err(RemoteError::api(404, "Document not found"));
            };
            let keep: Vec<(String, Value)> = existing
                .as_object()
                .unwrap()
                .iter()
                .filter(|(k, _)| k.starts_with('$'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut next = data.as_object().cloned().unwrap_or_default();
            for (k, v) in keep {
                next.insert(k, v);
            }
            *existing = Value::Object(next);
            Ok(existing.clone())
        }

        async fn list_documents(
            &self,
            collection: &str,
            owner_id: &str,
        ) -> Result<Vec<Value>, RemoteError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.list_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
            if self.fail_lists.load(Ordering::SeqCst) {
                return Err(RemoteError::Network("Cannot reach cloud store".into()));
            }
            Ok(self
                .documents(collection)
                .into_iter()
                .filter(|d| d["userId"] == owner_id)
                .collect())
        }

        async fn upload_blob(
            &self,
            _bucket: &str,
            file_id: &str,
            _file_name: &str,
            _bytes: Vec<u8>,
            _content_type: &str,
        ) -> Result<String, RemoteError> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_uploads.load(Ordering::SeqCst) {
                return Err(RemoteError::api(500, "Cloud store server error"));
            }
            Ok(file_id.to_string())
        }
    }

    fn insert_business(db: &DbState, name: &str) -> i64 {
        let conn = db.conn.lock().unwrap();
        store::insert(
            &conn,
            Table::Businesses,
            &serde_json::json!({ "name": name, "currency": "NGN" }),
        )
        .unwrap()
    }

    fn local_rows(db: &DbState, table: Table) -> Vec<Value> {
        let conn = db.conn.lock().unwrap();
        store::get_all(&conn, table).unwrap()
    }

    #[tokio::test]
    async fn test_push_is_idempotent_second_pass_updates() {
        let db = test_db();
        let remote = MockRemote::default();
        let state = SyncState::new();
        insert_business(&db, "Shop #1");

        sync_for_owner(&db, &remote, &state, OWNER).await.unwrap();
        sync_for_owner(&db, &remote, &state, OWNER).await.unwrap();

        // One create on the first pass; the retry routed as an update.
        assert_eq!(remote.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote.documents("businesses").len(), 1);
        assert!(remote.update_calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_pull_is_idempotent_no_duplicate_local_rows() {
        let db = test_db();
        let remote = MockRemote::default();
        let state = SyncState::new();
        remote.seed_document(
            "parties",
            "doc-p1",
            serde_json::json!({ "businessId": 1, "name": "Asha", "type": "CUSTOMER", "userId": OWNER }),
        );

        sync_for_owner(&db, &remote, &state, OWNER).await.unwrap();
        sync_for_owner(&db, &remote, &state, OWNER).await.unwrap();

        let rows = local_rows(&db, Table::Parties);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["remoteId"], serde_json::json!("doc-p1"));
        assert_eq!(rows[0]["name"], serde_json::json!("Asha"));
    }

    #[tokio::test]
    async fn test_round_trip_leaves_one_row_and_one_document() {
        let db = test_db();
        let remote = MockRemote::default();
        let state = SyncState::new();
        let local_id = insert_business(&db, "Shop #1");

        let outcome = sync_for_owner(&db, &remote, &state, OWNER).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed { .. }));

        let rows = local_rows(&db, Table::Businesses);
        assert_eq!(rows.len(), 1, "pull of the just-pushed doc must not duplicate");
        assert_eq!(rows[0]["id"], serde_json::json!(local_id));
        assert!(rows[0].get("remoteId").is_some());
        assert_eq!(remote.documents("businesses").len(), 1);
    }

    #[tokio::test]
    async fn test_outbound_payloads_never_carry_local_identifiers() {
        let db = test_db();
        let remote = MockRemote::default();
        let state = SyncState::new();
        let local_id = insert_business(&db, "Shop #1");

        sync_for_owner(&db, &remote, &state, OWNER).await.unwrap();
        sync_for_owner(&db, &remote, &state, OWNER).await.unwrap();

        let payloads = remote.pushed_payloads.lock().unwrap();
        assert!(!payloads.is_empty());
        for payload in payloads.iter() {
            assert!(payload.get("id").is_none(), "local id leaked: {payload}");
            assert!(payload.get("remoteId").is_none(), "remote id leaked: {payload}");
            assert_eq!(payload["userId"], serde_json::json!(OWNER));
        }

        // Pull must never rewrite the local primary key.
        let rows = local_rows(&db, Table::Businesses);
        assert_eq!(rows[0]["id"], serde_json::json!(local_id));
    }

    const RECEIPT_DATA_URL: &str = "data:image/png;base64,aGVsbG8gcmVjZWlwdA==";

    fn insert_receipt_transaction(db: &DbState, business_id: i64) -> i64 {
        let conn = db.conn.lock().unwrap();
        store::insert(
            &conn,
            Table::Transactions,
            &serde_json::json!({
                "businessId": business_id,
                "amount": 100.0,
                "type": "IN",
                "category": "Sales",
                "date": "2026-07-01",
                "receiptImage": RECEIPT_DATA_URL,
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_receipt_attachment_promoted_once() {
        let db = test_db();
        let remote = MockRemote::default();
        let state = SyncState::new();
        let biz = insert_business(&db, "Shop #1");
        let tx_id = insert_receipt_transaction(&db, biz);

        sync_for_owner(&db, &remote, &state, OWNER).await.unwrap();

        let row = {
            let conn = db.conn.lock().unwrap();
            store::get(&conn, Table::Transactions, tx_id).unwrap().unwrap()
        };
        let stored = row["receiptImage"].as_str().unwrap();
        assert!(
            !is_inline_receipt_data(stored),
            "attachment still inline after sync: {stored}"
        );
        assert_eq!(remote.upload_calls.load(Ordering::SeqCst), 1);

        // A later pass must not re-upload the already-promoted attachment.
        sync_for_owner(&db, &remote, &state, OWNER).await.unwrap();
        assert_eq!(remote.upload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_receipt_upload_failure_drops_attachment_not_record() {
        let db = test_db();
        let remote = MockRemote::default();
        remote.fail_uploads.store(true, Ordering::SeqCst);
        let state = SyncState::new();
        let biz = insert_business(&db, "Shop #1");
        let tx_id = insert_receipt_transaction(&db, biz);

        sync_for_owner(&db, &remote, &state, OWNER).await.unwrap();

        // Record still pushed, without the attachment field.
        let docs = remote.documents("transactions");
        assert_eq!(docs.len(), 1);
        assert!(docs[0].get("receiptImage").is_none());

        // The local row keeps the inline data so the next pass retries the
        // upload (the pulled document has no receiptImage key, so the column
        // is left alone).
        let row = {
            let conn = db.conn.lock().unwrap();
            store::get(&conn, Table::Transactions, tx_id).unwrap().unwrap()
        };
        assert_eq!(row["amount"], serde_json::json!(100.0));
        assert!(row.get("remoteId").is_some());
        assert!(is_inline_receipt_data(row["receiptImage"].as_str().unwrap()));
    }

    #[tokio::test]
    async fn test_second_sync_skips_while_first_in_flight() {
        let db = Arc::new(test_db());
        let remote = Arc::new(MockRemote::default());
        let state = Arc::new(SyncState::new());
        remote.list_delay_ms.store(80, Ordering::SeqCst);
        insert_business(&db, "Shop #1");

        let first = {
            let (db, remote, state) = (db.clone(), remote.clone(), state.clone());
            tokio::spawn(async move { sync_for_owner(&db, &*remote, &state, OWNER).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let creates_before = remote.create_calls.load(Ordering::SeqCst);
        let lists_before = remote.list_calls.load(Ordering::SeqCst);
        let second = sync_for_owner(&db, &*remote, &state, OWNER).await.unwrap();
        assert_eq!(second, SyncOutcome::SkippedInFlight);
        // The skipped call issued no remote calls of its own.
        assert_eq!(remote.create_calls.load(Ordering::SeqCst), creates_before);
        assert_eq!(remote.list_calls.load(Ordering::SeqCst), lists_before);

        let first_outcome = first.await.unwrap().unwrap();
        assert!(matches!(first_outcome, SyncOutcome::Completed { .. }));

        // Flag cleared exactly once: a third call proceeds.
        remote.list_delay_ms.store(0, Ordering::SeqCst);
        let third = sync_for_owner(&db, &*remote, &state, OWNER).await.unwrap();
        assert!(matches!(third, SyncOutcome::Completed { .. }));
        assert!(!state.in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_one_failing_record_does_not_block_the_rest() {
        let db = test_db();
        let remote = MockRemote::default();
        let state = SyncState::new();

        // Two rows already linked to remote documents, one of which will
        // reject its update; plus a brand-new row.
        remote.seed_document(
            "parties",
            "doc-bad",
            serde_json::json!({ "businessId": 1, "name": "Old Bad", "type": "CUSTOMER", "userId": OWNER }),
        );
        remote.seed_document(
            "parties",
            "doc-good",
            serde_json::json!({ "businessId": 1, "name": "Old Good", "type": "CUSTOMER", "userId": OWNER }),
        );
        {
            let conn = db.conn.lock().unwrap();
            let bad = store::insert(
                &conn,
                Table::Parties,
                &serde_json::json!({ "businessId": 1, "name": "New Bad", "type": "CUSTOMER" }),
            )
            .unwrap();
            store::set_remote_id(&conn, Table::Parties, bad, "doc-bad").unwrap();
            let good = store::insert(
                &conn,
                Table::Parties,
                &serde_json::json!({ "businessId": 1, "name": "New Good", "type": "CUSTOMER" }),
            )
            .unwrap();
            store::set_remote_id(&conn, Table::Parties, good, "doc-good").unwrap();
            store::insert(
                &conn,
                Table::Parties,
                &serde_json::json!({ "businessId": 1, "name": "Fresh", "type": "SUPPLIER" }),
            )
            .unwrap();
        }
        remote
            .fail_update_ids
            .lock()
            .unwrap()
            .insert("doc-bad".to_string());

        let outcome = sync_for_owner(&db, &remote, &state, OWNER).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed { .. }));

        let docs = remote.documents("parties");
        let good = docs.iter().find(|d| d["$id"] == "doc-good").unwrap();
        let bad = docs.iter().find(|d| d["$id"] == "doc-bad").unwrap();
        // The healthy record's update went through; the failing one kept its
        // prior remote state for retry on the next pass.
        assert_eq!(good["name"], serde_json::json!("New Good"));
        assert_eq!(bad["name"], serde_json::json!("Old Bad"));
        // The fresh row was still created.
        assert_eq!(docs.len(), 3);
        // And the pull phase still ran for every table.
        assert!(remote.list_calls.load(Ordering::SeqCst) >= SYNC_ORDER.len());
    }

    #[tokio::test]
    async fn test_unreachable_listing_aborts_pass_and_clears_flag() {
        let db = test_db();
        let remote = MockRemote::default();
        remote.fail_lists.store(true, Ordering::SeqCst);
        let state = SyncState::new();
        insert_business(&db, "Shop #1");

        let result = sync_for_owner(&db, &remote, &state, OWNER).await;
        assert!(result.is_err());
        assert!(!state.in_flight.load(Ordering::SeqCst));
        // Only the first table was attempted before the abort.
        assert_eq!(remote.list_calls.load(Ordering::SeqCst), 1);
        // The failed pass must not stamp last-synced.
        assert!(state.last_synced.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_network_failure_during_push_aborts_pass() {
        let db = test_db();
        let remote = MockRemote::default();
        remote.offline.store(true, Ordering::SeqCst);
        let state = SyncState::new();
        insert_business(&db, "Shop #1");
        insert_business(&db, "Shop #2");

        let result = sync_for_owner(&db, &remote, &state, OWNER).await;
        assert!(result.is_err());
        // Unreachable on the first create; the second row was not attempted
        // and nothing was listed.
        assert_eq!(remote.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote.list_calls.load(Ordering::SeqCst), 0);
        assert!(!state.in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_pulled_document_wins_over_local_row() {
        let db = test_db();
        let remote = MockRemote::default();

        let local_id = {
            let conn = db.conn.lock().unwrap();
            let id = store::insert(
                &conn,
                Table::Transactions,
                &serde_json::json!({ "businessId": 1, "amount": 100.0, "type": "IN" }),
            )
            .unwrap();
            store::set_remote_id(&conn, Table::Transactions, id, "doc-t1").unwrap();
            id
        };
        remote.seed_document(
            "transactions",
            "doc-t1",
            serde_json::json!({ "businessId": 1, "amount": 150.0, "type": "IN", "userId": OWNER }),
        );

        // Exercise the pull phase in isolation: the remote copy disagrees
        // with the local row and must win unconditionally.
        pull_table(&db, &remote, Table::Transactions, OWNER)
            .await
            .unwrap();

        let row = {
            let conn = db.conn.lock().unwrap();
            store::get(&conn, Table::Transactions, local_id).unwrap().unwrap()
        };
        assert_eq!(row["amount"], serde_json::json!(150.0));
        assert_eq!(row["id"], serde_json::json!(local_id));
    }

    #[test]
    fn test_outbound_payload_scrubs_identifiers_and_attaches_owner() {
        let row = serde_json::json!({
            "id": 12,
            "remoteId": "doc-9",
            "name": "Shop",
        });
        let payload = outbound_payload(&row, OWNER);
        assert!(payload.get("id").is_none());
        assert!(payload.get("remoteId").is_none());
        assert_eq!(payload["userId"], serde_json::json!(OWNER));
        assert_eq!(payload["name"], serde_json::json!("Shop"));
    }

    #[test]
    fn test_inbound_payload_strips_server_metadata() {
        let doc = serde_json::json!({
            "$id": "doc-1",
            "$collectionId": "parties",
            "$databaseId": "books",
            "$createdAt": "2026-01-01T00:00:00Z",
            "$updatedAt": "2026-01-02T00:00:00Z",
            "$permissions": [],
            "userId": OWNER,
            "name": "Asha",
        });
        let payload = inbound_payload(&doc, "doc-1");
        assert_eq!(payload["remoteId"], serde_json::json!("doc-1"));
        assert_eq!(payload["name"], serde_json::json!("Asha"));
        for key in SERVER_METADATA_KEYS {
            assert!(payload.get(*key).is_none(), "{key} survived scrubbing");
        }
    }

    #[test]
    fn test_normalize_date_string_shapes() {
        assert_eq!(
            normalize_date_string("2026-07-01").as_deref(),
            Some("2026-07-01T00:00:00+00:00")
        );
        assert_eq!(
            normalize_date_string("2026-07-01T09:30:00").as_deref(),
            Some("2026-07-01T09:30:00+00:00")
        );
        // Already-canonical values survive with their instant intact.
        let parsed = normalize_date_string("2026-07-01T09:30:00+02:00").unwrap();
        assert_eq!(
            DateTime::parse_from_rfc3339(&parsed).unwrap().timestamp(),
            DateTime::parse_from_rfc3339("2026-07-01T09:30:00+02:00")
                .unwrap()
                .timestamp()
        );
        assert!(normalize_date_string("not a date").is_none());
    }

    #[test]
    fn test_decode_data_url_rejects_malformed_input() {
        assert!(decode_data_url("data:image/png;base64,iVBORw0KGgo=").is_ok());
        assert!(decode_data_url("data:image/png,plain").is_err());
        assert!(decode_data_url("nonsense").is_err());
        let (mime, bytes) = decode_data_url("data:image/png;base64,aGk=").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"hi");
    }
}
