//! Cloud document-store seam.
//!
//! The sync engine talks to the cloud through this trait so the engine can
//! be exercised against an in-memory double in tests. The one production
//! implementation is `api::CloudClient`.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the cloud store.
///
/// The engine only cares about one distinction: `Network` means the service
/// is unreachable (systemic — the whole pass is doomed), everything else is
/// scoped to the call that produced it.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport-level failure: DNS, connect, TLS, timeout.
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with a non-success status.
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    /// The service answered 2xx but the body was not the expected JSON.
    #[error("invalid response from cloud store: {0}")]
    InvalidResponse(String),

    /// No stored session; the caller should not have issued the request.
    #[error("not authenticated")]
    Unauthenticated,
}

impl RemoteError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// True when the failure means the service itself is unreachable rather
    /// than this particular call being rejected.
    pub fn is_network(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

/// Contract of the multi-tenant cloud collection store consumed by the sync
/// engine. Documents are JSON objects; server-assigned metadata fields are
/// `$`-prefixed (`$id`, `$createdAt`, ...), matching the Appwrite wire shape.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a document under a client-generated unique id. Returns the
    /// stored document including its server `$id`.
    async fn create_document(
        &self,
        collection: &str,
        document_id: &str,
        data: &Value,
    ) -> Result<Value, RemoteError>;

    /// Overwrite an existing document's attributes.
    async fn update_document(
        &self,
        collection: &str,
        document_id: &str,
        data: &Value,
    ) -> Result<Value, RemoteError>;

    /// List every document in a collection owned by `owner_id`.
    async fn list_documents(
        &self,
        collection: &str,
        owner_id: &str,
    ) -> Result<Vec<Value>, RemoteError>;

    /// Upload binary data to blob storage; returns the stored file id.
    async fn upload_blob(
        &self,
        bucket: &str,
        file_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, RemoteError>;
}
