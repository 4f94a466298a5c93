//! Application state

use crate::auth::{ClaimsExtractor, JwksSource, JwksVerifier, TokenVerifier, UnverifiedVerifier};
use crate::config::{GatewayConfig, VerificationMode};
use crate::middleware::AuthGate;
use anyhow::bail;
use blobgate_core::{GatewaySettings, StorageGateway};
use blobgate_storage::{
    AzureBlobConfig, AzureProvider, BackendProvider, ClientSecretCredential, MemoryBlobStore,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Application state shared across handlers
pub struct AppState {
    /// Gateway configuration
    pub config: GatewayConfig,
    /// Owner-scoped upload and listing
    pub gateway: Arc<StorageGateway>,
    /// Per-request authentication
    pub auth_gate: Arc<AuthGate>,
}

impl AppState {
    /// Create a new application state
    ///
    /// Storage is not contacted here; the backend is resolved on the first
    /// upload or listing, so a misconfigured account surfaces per request.
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let settings = gateway_settings(&config);

        let gateway = if config.use_memory_store {
            warn!("Using in-memory blob store (data will not persist)");
            StorageGateway::with_backend(settings, Arc::new(MemoryBlobStore::new()))
        } else {
            info!(
                account = %config.storage_account,
                container = %config.storage_container,
                "Using Azure Blob storage"
            );
            StorageGateway::new(settings, azure_provider(&config))
        };

        Self::with_gateway(config, Arc::new(gateway))
    }

    /// Create state around an existing gateway
    pub fn with_gateway(config: GatewayConfig, gateway: Arc<StorageGateway>) -> anyhow::Result<Self> {
        let verifier = build_verifier(&config)?;
        let extractor = ClaimsExtractor::new(verifier).with_leeway(config.token_leeway_secs);
        info!(verifier = extractor.verifier_name(), "Token verification configured");

        let auth_gate = AuthGate::new(config.public_paths.clone(), Arc::new(extractor));

        Ok(Self {
            config,
            gateway,
            auth_gate: Arc::new(auth_gate),
        })
    }
}

/// Gateway tunables derived from the server configuration
pub fn gateway_settings(config: &GatewayConfig) -> GatewaySettings {
    GatewaySettings {
        max_upload_size: config.max_upload_size,
        transient_retries: config.storage_retries,
        ..Default::default()
    }
}

fn azure_provider(config: &GatewayConfig) -> Arc<dyn BackendProvider> {
    let mut blob_config = AzureBlobConfig::new(&config.storage_account, &config.storage_container);
    if let Some(endpoint) = &config.storage_endpoint {
        blob_config = blob_config.with_endpoint(endpoint);
    }

    match config.service_principal() {
        Some((tenant, client, secret)) => {
            info!("Service principal credentials configured for storage");
            Arc::new(AzureProvider::with_service_principal(
                blob_config,
                ClientSecretCredential::new(tenant, client, secret),
            ))
        }
        None => Arc::new(AzureProvider::new(blob_config)),
    }
}

fn build_verifier(config: &GatewayConfig) -> anyhow::Result<Arc<dyn TokenVerifier>> {
    match config.verification {
        VerificationMode::Unverified => Ok(Arc::new(UnverifiedVerifier::new())),
        VerificationMode::Jwks => {
            let mut verifier = match (&config.jwks_url, &config.tenant_id) {
                (Some(url), _) => {
                    let mut verifier = JwksVerifier::new(JwksSource::Url(url.clone()));
                    if let Some(aud) = &config.client_id {
                        verifier = verifier.audience(aud);
                    }
                    verifier
                }
                (None, Some(tenant)) => JwksVerifier::for_tenant(tenant, config.client_id.as_deref()),
                (None, None) => {
                    bail!("JWKS verification needs MSAL_TENANT_ID or JWKS_URL")
                }
            };
            if let Some(iss) = &config.issuer {
                verifier = verifier.issuer(iss);
            }
            Ok(Arc::new(verifier))
        }
    }
}
