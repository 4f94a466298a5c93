//! # Blobgate Storage
//!
//! Blob storage layer for the Blobgate upload gateway.
//!
//! This crate provides:
//! - **Backend trait**: Put and paginated list over a single blob container
//! - **Azure Blob**: REST client for Azure Blob Storage using bearer tokens
//! - **Credential chain**: Explicit service principal, managed identity, local `az` login
//! - **Memory store**: In-process backend for tests and development
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            StorageGateway               │
//! ├─────────────────────────────────────────┤
//! │           BlobBackend Trait             │
//! ├───────────────────────┬─────────────────┤
//! │     AzureBlobStore    │ MemoryBlobStore │
//! ├───────────────────────┴─────────────────┤
//! │  ChainedCredential (SP → MSI → az CLI)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use blobgate_storage::{AzureBlobConfig, AzureProvider, BackendProvider};
//!
//! let provider = AzureProvider::new(AzureBlobConfig::new("acct", "uploads"));
//! let backend = provider.connect().await?;
//! let props = backend.put_blob("u1/a.txt", data, "text/plain", &Default::default()).await?;
//! ```

pub mod azure;
pub mod credential;
pub mod error;
pub mod memory;

pub use azure::{AzureBlobConfig, AzureBlobStore, AzureProvider, ORIGINAL_FILENAME_META};
pub use credential::{
    AccessToken, AzureCliCredential, ChainedCredential, ClientSecretCredential,
    ManagedIdentityCredential, TokenCredential, STORAGE_SCOPE,
};
pub use error::{Result, StorageError};
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Default page size requested from list operations
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Content type used when the caller supplies none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Properties reported by the backend after a successful write
#[derive(Clone, Debug)]
pub struct BlobProperties {
    /// Blob name (object key)
    pub name: String,
    /// Retrieval URL
    pub url: String,
    /// Bytes written
    pub size: u64,
    /// Content type stored with the blob
    pub content_type: String,
    /// Creation time as reported by the backend
    pub created_on: DateTime<Utc>,
}

/// A single entry of a listing page
#[derive(Clone, Debug, PartialEq)]
pub struct BlobItem {
    /// Blob name (object key)
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Content type, if the backend has one recorded
    pub content_type: Option<String>,
    /// Creation time
    pub created_on: Option<DateTime<Utc>>,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
    /// User metadata recorded with the blob
    pub metadata: HashMap<String, String>,
}

/// One page of a listing plus the marker for the next page
#[derive(Clone, Debug, Default)]
pub struct BlobPage {
    /// Items in backend order
    pub items: Vec<BlobItem>,
    /// Continuation marker; `None` when the listing is complete
    pub next_marker: Option<String>,
}

/// Trait for blob storage backends
///
/// A backend addresses one container. Handles are shared across requests,
/// so implementations must be cheap to call concurrently.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// URL a client would use to retrieve `name`
    fn blob_url(&self, name: &str) -> String;

    /// Write `data` under `name`, recording `content_type` and user metadata
    async fn put_blob(
        &self,
        name: &str,
        data: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<BlobProperties>;

    /// List one page of blobs whose names start with `prefix`
    async fn list_blobs(&self, prefix: &str, marker: Option<&str>) -> Result<BlobPage>;
}

/// Trait for components that resolve a ready-to-use backend
///
/// Resolution may involve network calls (credential probing), so it is
/// performed once, on first use, by the gateway.
#[async_trait]
pub trait BackendProvider: Send + Sync {
    /// Build a backend handle
    async fn connect(&self) -> Result<Arc<dyn BlobBackend>>;
}

/// Provider that hands out an already constructed backend
pub struct StaticProvider(pub Arc<dyn BlobBackend>);

#[async_trait]
impl BackendProvider for StaticProvider {
    async fn connect(&self) -> Result<Arc<dyn BlobBackend>> {
        Ok(Arc::clone(&self.0))
    }
}
