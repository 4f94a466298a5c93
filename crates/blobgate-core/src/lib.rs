//! # Blobgate Core
//!
//! Upload gateway for the Blobgate service.
//!
//! This crate provides:
//! - **Identity**: The verified caller a request acts for
//! - **StorageGateway**: Owner-scoped upload and listing with size limits
//! - **Object keys**: Collision-resistant, owner-prefixed key generation
//! - **Object metadata**: What the backend reported about stored files
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          HTTP boundary (server)         │
//! ├─────────────────────────────────────────┤
//! │            StorageGateway               │
//! │  size checks · key scoping · retries    │
//! ├─────────────────────────────────────────┤
//! │     BlobBackend (blobgate-storage)      │
//! └─────────────────────────────────────────┘
//! ```

pub mod error;
pub mod gateway;
pub mod identity;
pub mod metadata;

pub use error::{GatewayError, Result};
pub use gateway::{
    object_key, owner_prefix, sanitize_extension, GatewaySettings, StorageGateway,
    DEFAULT_MAX_UPLOAD_SIZE,
};
pub use identity::Identity;
pub use metadata::{NewUpload, StoredObjectMetadata};
