//! Cloud collection-store API client.
//!
//! Typed wrapper over the hosted document store's REST API (Appwrite-style:
//! project header, session secret header, `$`-prefixed server metadata).
//! Implements the `RemoteStore` trait consumed by the sync engine, plus the
//! account/session endpoints used at login and the connectivity probe used
//! by the network watcher.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::remote::{RemoteError, RemoteStore};
use crate::storage;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity probe.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Logical database holding all ledger collections.
pub const DATABASE_ID: &str = "books";

/// Blob-storage bucket for receipt images.
pub const RECEIPTS_BUCKET: &str = "receipts";

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the cloud endpoint URL:
/// - strip trailing slashes
/// - ensure a scheme is present (https, or http for localhost)
/// - ensure the `/v1` API prefix is present
pub fn normalize_endpoint_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Ensure the versioned API root
    if !url.ends_with("/v1") {
        url.push_str("/v1");
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a `RemoteError::Network` with a message a
/// user can act on.
fn transport_error(endpoint: &str, err: &reqwest::Error) -> RemoteError {
    if err.is_connect() {
        return RemoteError::Network(format!("Cannot reach cloud store at {endpoint}"));
    }
    if err.is_timeout() {
        return RemoteError::Network(format!("Connection to {endpoint} timed out"));
    }
    RemoteError::Network(format!("Network error communicating with {endpoint}: {err}"))
}

/// Convert an HTTP status code into a user-friendly message.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session is invalid or expired".to_string(),
        403 => "Not authorized for this project".to_string(),
        404 => "Cloud store endpoint not found".to_string(),
        409 => "Document already exists".to_string(),
        s if s >= 500 => format!("Cloud store server error (HTTP {s})"),
        s => format!("Unexpected response from cloud store (HTTP {s})"),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Authenticated client for the cloud document store.
pub struct CloudClient {
    http: Client,
    endpoint: String,
    project_id: String,
    session_secret: Option<String>,
}

impl CloudClient {
    pub fn new(
        endpoint: &str,
        project_id: &str,
        session_secret: Option<String>,
    ) -> Result<Self, String> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            http,
            endpoint: normalize_endpoint_url(endpoint),
            project_id: project_id.trim().to_string(),
            session_secret,
        })
    }

    /// Build a client from the credential store. Fails when the endpoint or
    /// project id has not been configured yet.
    pub fn from_storage() -> Result<Self, String> {
        let endpoint = storage::get_credential(storage::KEY_CLOUD_ENDPOINT)
            .ok_or("Cloud store not configured: missing endpoint")?;
        let project_id = storage::get_credential(storage::KEY_CLOUD_PROJECT_ID)
            .ok_or("Cloud store not configured: missing project id")?;
        let session_secret = storage::get_credential(storage::KEY_SESSION_SECRET);
        Self::new(&endpoint, &project_id, session_secret)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self
            .http
            .request(method, format!("{}{path}", self.endpoint))
            .header("X-Appwrite-Project", &self.project_id);
        if let Some(secret) = &self.session_secret {
            req = req.header("X-Appwrite-Session", secret);
        }
        req
    }

    /// Send a request and parse the JSON body, mapping transport failures,
    /// error statuses, and malformed bodies to `RemoteError`.
    async fn send_json(&self, req: RequestBuilder) -> Result<Value, RemoteError> {
        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(&self.endpoint, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            // Preserve the service's own message when the body carries one.
            let message = serde_json::from_str::<Value>(&body_text)
                .ok()
                .and_then(|v| {
                    v.get("message")
                        .and_then(Value::as_str)
                        .map(|s| s.to_string())
                })
                .unwrap_or_else(|| status_message(status));
            return Err(RemoteError::api(status.as_u16(), message));
        }

        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }

    // -- Account / session --------------------------------------------------

    /// Create an email/password session. Returns the raw session document
    /// (contains `secret` and the owning `userId`).
    pub async fn create_email_session(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Value, RemoteError> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.send_json(
            self.request(Method::POST, "/account/sessions/email")
                .json(&body),
        )
        .await
    }

    /// Fetch the authenticated account (`$id`, `name`, `email`).
    pub async fn get_account(&self) -> Result<Value, RemoteError> {
        if self.session_secret.is_none() {
            return Err(RemoteError::Unauthenticated);
        }
        self.send_json(self.request(Method::GET, "/account")).await
    }

    /// Delete the current session (logout). Best-effort on the caller side.
    pub async fn delete_current_session(&self) -> Result<(), RemoteError> {
        if self.session_secret.is_none() {
            return Err(RemoteError::Unauthenticated);
        }
        self.send_json(self.request(Method::DELETE, "/account/sessions/current"))
            .await?;
        Ok(())
    }

    // -- Connectivity -------------------------------------------------------

    /// Lightweight reachability probe used by the network watcher. Any HTTP
    /// answer (including an auth rejection) counts as "online".
    pub async fn is_reachable(&self) -> bool {
        let client = match Client::builder().timeout(CONNECTIVITY_TIMEOUT).build() {
            Ok(c) => c,
            Err(_) => return false,
        };
        client
            .get(format!("{}/health/version", self.endpoint))
            .header("X-Appwrite-Project", &self.project_id)
            .send()
            .await
            .is_ok()
    }
}

/// Owner filter in the query encoding the collection store expects.
fn owner_equals_query(owner_id: &str) -> String {
    serde_json::json!({
        "method": "equal",
        "attribute": "userId",
        "values": [owner_id],
    })
    .to_string()
}

#[async_trait]
impl RemoteStore for CloudClient {
    async fn create_document(
        &self,
        collection: &str,
        document_id: &str,
        data: &Value,
    ) -> Result<Value, RemoteError> {
        let path = format!("/databases/{DATABASE_ID}/collections/{collection}/documents");
        let body = serde_json::json!({ "documentId": document_id, "data": data });
        self.send_json(self.request(Method::POST, &path).json(&body))
            .await
    }

    async fn update_document(
        &self,
        collection: &str,
        document_id: &str,
        data: &Value,
    ) -> Result<Value, RemoteError> {
        let path =
            format!("/databases/{DATABASE_ID}/collections/{collection}/documents/{document_id}");
        let body = serde_json::json!({ "data": data });
        self.send_json(self.request(Method::PATCH, &path).json(&body))
            .await
    }

    async fn list_documents(
        &self,
        collection: &str,
        owner_id: &str,
    ) -> Result<Vec<Value>, RemoteError> {
        let path = format!("/databases/{DATABASE_ID}/collections/{collection}/documents");
        let req = self
            .request(Method::GET, &path)
            .query(&[("queries[]", owner_equals_query(owner_id))]);
        let body = self.send_json(req).await?;

        match body.get("documents").and_then(Value::as_array) {
            Some(docs) => Ok(docs.clone()),
            None => {
                warn!(collection, "list response missing documents array");
                Err(RemoteError::InvalidResponse(
                    "missing documents array".into(),
                ))
            }
        }
    }

    async fn upload_blob(
        &self,
        bucket: &str,
        file_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, RemoteError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| RemoteError::InvalidResponse(format!("invalid mime type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("fileId", file_id.to_string())
            .part("file", part);

        let path = format!("/storage/buckets/{bucket}/files");
        let body = self
            .send_json(self.request(Method::POST, &path).multipart(form))
            .await?;

        body.get("$id")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| RemoteError::InvalidResponse("upload response missing $id".into()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
