//! Gateway configuration

use blobgate_core::DEFAULT_MAX_UPLOAD_SIZE;
use serde::{Deserialize, Serialize};

/// How bearer token signatures are checked
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    /// Accept any well-formed token (development only)
    #[default]
    Unverified,
    /// Check signatures against the issuer's JWKS
    Jwks,
}

/// Gateway server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Azure storage account name
    pub storage_account: String,
    /// Blob container holding uploads
    pub storage_container: String,
    /// Blob endpoint override (Azurite, sovereign clouds)
    pub storage_endpoint: Option<String>,
    /// Service principal tenant, tried first in the credential chain
    pub storage_tenant_id: Option<String>,
    /// Service principal client id
    pub storage_client_id: Option<String>,
    /// Service principal client secret
    #[serde(skip_serializing)]
    pub storage_client_secret: Option<String>,
    /// Use in-memory storage (for testing/development)
    pub use_memory_store: bool,
    /// Maximum upload size (bytes)
    pub max_upload_size: u64,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Extra attempts for transient storage failures
    pub storage_retries: u32,
    /// Token signature checking
    pub verification: VerificationMode,
    /// Identity tenant that issues bearer tokens
    pub tenant_id: Option<String>,
    /// Application (client) id, the expected token audience
    pub client_id: Option<String>,
    /// Fixed JWKS URL, skipping discovery
    pub jwks_url: Option<String>,
    /// Expected issuer, overriding the tenant default
    pub issuer: Option<String>,
    /// Clock skew tolerated on `exp` (seconds)
    pub token_leeway_secs: u64,
    /// Paths served without authentication
    pub public_paths: Vec<String>,
    /// CORS allowed origins
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            storage_account: String::new(),
            storage_container: String::new(),
            storage_endpoint: None,
            storage_tenant_id: None,
            storage_client_id: None,
            storage_client_secret: None,
            use_memory_store: false,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            max_body_size: 64 * 1024 * 1024, // 64 MiB
            storage_retries: 0,
            verification: VerificationMode::Unverified,
            tenant_id: None,
            client_id: None,
            jwks_url: None,
            issuer: None,
            token_leeway_secs: 60,
            public_paths: default_public_paths(),
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Allow-list used when none is configured
pub fn default_public_paths() -> Vec<String> {
    vec!["/admin/".to_string(), "/api/health/".to_string()]
}

impl GatewayConfig {
    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Service principal credentials, when all three parts are configured
    pub fn service_principal(&self) -> Option<(&str, &str, &str)> {
        match (
            self.storage_tenant_id.as_deref(),
            self.storage_client_id.as_deref(),
            self.storage_client_secret.as_deref(),
        ) {
            (Some(tenant), Some(client), Some(secret))
                if !tenant.is_empty() && !client.is_empty() && !secret.is_empty() =>
            {
                Some((tenant, client, secret))
            }
            _ => None,
        }
    }
}
