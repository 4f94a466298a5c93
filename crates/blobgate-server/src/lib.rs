//! # Blobgate Server
//!
//! Authenticated file upload gateway over Azure Blob storage.
//!
//! This crate provides:
//! - **HTTP API**: Upload, listing and health endpoints
//! - **Authentication**: Bearer token claims extraction with pluggable signature checks
//! - **Auth gate**: Per-request allow-list and identity attachment
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   HTTP Clients                      │
//! │          (browser SPA, curl, scripts)               │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────┐
//! │                  Blobgate Server                    │
//! ├─────────────────────────────────────────────────────┤
//! │  Request ID │ Logging │ AuthGate (ClaimsExtractor)  │
//! ├─────────────────────────────────────────────────────┤
//! │        Handlers (upload, files, health)             │
//! ├─────────────────────────────────────────────────────┤
//! │                  blobgate-core                      │
//! │     (StorageGateway: limits, keys, listing)         │
//! ├─────────────────────────────────────────────────────┤
//! │                 blobgate-storage                    │
//! │       (Azure Blob, credential chain, memory)        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::{AuthError, ClaimsExtractor};
pub use config::{GatewayConfig, VerificationMode};
pub use error::{ApiError, ErrorCode};
pub use middleware::{AuthGate, GateOutcome};
pub use server::{run_server, run_server_with_shutdown};
pub use state::AppState;
