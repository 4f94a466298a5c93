//! Token credentials for Azure Storage
//!
//! Sources are tried in order by [`ChainedCredential`]: an explicitly
//! configured service principal, the platform managed identity, then the
//! developer's `az` login session. No storage secret is ever embedded.

use crate::{Result, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime, TimeZone, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// OAuth scope granting access to Azure Storage data
pub const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

/// Default Microsoft identity platform host
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Azure Instance Metadata Service token endpoint
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN_SECS: i64 = 300;

/// Bearer token plus expiry
#[derive(Clone, Debug)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    /// True if the token is still usable at `now` with the refresh margin applied
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - ChronoDuration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

/// A source of bearer tokens
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Source name, used in logs and in the aggregate failure message
    fn name(&self) -> &'static str;

    /// Obtain a token for `scope`
    async fn get_token(&self, scope: &str) -> Result<AccessToken>;
}

/// `https://storage.azure.com/.default` -> `https://storage.azure.com/`
fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix(".default").unwrap_or(scope)
}

fn expires_from_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    Utc.timestamp_opt(secs, 0).single()
}

// ============================================================================
// Service principal
// ============================================================================

#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Service principal authenticating with a client secret
pub struct ClientSecretCredential {
    client: Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

impl ClientSecretCredential {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Override the identity platform host
    pub fn with_authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = host.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    fn name(&self) -> &'static str {
        "client_secret"
    }

    #[instrument(skip(self), fields(tenant = %self.tenant_id))]
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host, self.tenant_id
        );
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Credential(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: OAuthTokenResponse = response.json().await?;
        Ok(AccessToken {
            token: parsed.access_token,
            expires_on: Utc::now() + ChronoDuration::seconds(parsed.expires_in as i64),
        })
    }
}

// ============================================================================
// Managed identity
// ============================================================================

enum ManagedIdentityEndpoint {
    /// App Service / Functions (`IDENTITY_ENDPOINT` + `IDENTITY_HEADER`)
    AppService { endpoint: String, header: String },
    /// VM / AKS instance metadata service
    Imds { endpoint: String },
}

/// Platform-assigned identity of the host
pub struct ManagedIdentityCredential {
    client: Client,
    endpoint: ManagedIdentityEndpoint,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    /// Pick the endpoint advertised by the environment, falling back to IMDS
    pub fn from_env() -> Self {
        let endpoint = match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(endpoint), Ok(header)) => ManagedIdentityEndpoint::AppService { endpoint, header },
            _ => ManagedIdentityEndpoint::Imds {
                endpoint: IMDS_ENDPOINT.to_string(),
            },
        };
        Self::build(endpoint)
    }

    /// Use an IMDS-compatible endpoint
    pub fn imds(endpoint: impl Into<String>) -> Self {
        Self::build(ManagedIdentityEndpoint::Imds {
            endpoint: endpoint.into(),
        })
    }

    /// Use an App Service identity endpoint
    pub fn app_service(endpoint: impl Into<String>, header: impl Into<String>) -> Self {
        Self::build(ManagedIdentityEndpoint::AppService {
            endpoint: endpoint.into(),
            header: header.into(),
        })
    }

    /// Request a user-assigned identity
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    fn build(endpoint: ManagedIdentityEndpoint) -> Self {
        // IMDS is unroutable off-Azure; fail fast so the chain moves on
        let client = Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint,
            client_id: None,
        }
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        "managed_identity"
    }

    #[instrument(skip(self))]
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let resource = scope_to_resource(scope);
        let mut query = vec![("resource", resource.to_string())];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.clone()));
        }

        let request = match &self.endpoint {
            ManagedIdentityEndpoint::AppService { endpoint, header } => {
                query.push(("api-version", "2019-08-01".to_string()));
                self.client
                    .get(endpoint)
                    .header("X-IDENTITY-HEADER", header)
                    .query(&query)
            }
            ManagedIdentityEndpoint::Imds { endpoint } => {
                query.push(("api-version", "2018-02-01".to_string()));
                self.client
                    .get(endpoint)
                    .header("Metadata", "true")
                    .query(&query)
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Credential(format!("managed identity unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(StorageError::Credential(format!(
                "managed identity endpoint returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StorageError::Credential("response lacks access_token".to_string()))?;
        let expires_on = body
            .get("expires_on")
            .and_then(expires_from_value)
            .ok_or_else(|| StorageError::Credential("response lacks expires_on".to_string()))?;

        Ok(AccessToken {
            token: token.to_string(),
            expires_on,
        })
    }
}

// ============================================================================
// Azure CLI
// ============================================================================

/// Developer login session of the `az` command line tool
pub struct AzureCliCredential {
    program: String,
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self {
            program: "az".to_string(),
        }
    }
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_output(stdout: &[u8]) -> Result<AccessToken> {
        let body: serde_json::Value = serde_json::from_slice(stdout)?;
        let token = body
            .get("accessToken")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StorageError::Credential("az output lacks accessToken".to_string()))?;

        // Newer CLI versions emit a unix timestamp, older ones only local time
        let expires_on = body
            .get("expires_on")
            .and_then(expires_from_value)
            .or_else(|| {
                body.get("expiresOn")
                    .and_then(|v| v.as_str())
                    .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
                    .and_then(|naive| naive.and_local_timezone(Local).single())
                    .map(|local| local.with_timezone(&Utc))
            })
            .ok_or_else(|| StorageError::Credential("az output lacks expiry".to_string()))?;

        Ok(AccessToken {
            token: token.to_string(),
            expires_on,
        })
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &'static str {
        "azure_cli"
    }

    #[instrument(skip(self))]
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let output = tokio::process::Command::new(&self.program)
            .args([
                "account",
                "get-access-token",
                "--resource",
                scope_to_resource(scope),
                "--output",
                "json",
            ])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StorageError::Credential(format!("failed to run az: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StorageError::Credential(format!(
                "az exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Self::parse_output(&output.stdout)
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Ordered credential chain
///
/// The first source that yields a token is remembered and used from then
/// on. Tokens are cached and refreshed shortly before expiry.
pub struct ChainedCredential {
    sources: Vec<Arc<dyn TokenCredential>>,
    selected: RwLock<Option<usize>>,
    cached: RwLock<Option<AccessToken>>,
}

impl ChainedCredential {
    pub fn new(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self {
            sources,
            selected: RwLock::new(None),
            cached: RwLock::new(None),
        }
    }

    /// Standard chain: service principal (when configured), managed identity, `az` CLI
    pub fn standard(service_principal: Option<ClientSecretCredential>) -> Self {
        let mut sources: Vec<Arc<dyn TokenCredential>> = Vec::new();
        if let Some(sp) = service_principal {
            sources.push(Arc::new(sp));
        }
        sources.push(Arc::new(ManagedIdentityCredential::from_env()));
        sources.push(Arc::new(AzureCliCredential::new()));
        Self::new(sources)
    }

    /// Name of the source that produced the first token, if any
    pub fn selected_source(&self) -> Option<&'static str> {
        let selected = *self.selected.read();
        selected.and_then(|i| self.sources.get(i)).map(|s| s.name())
    }

    fn store(&self, token: &AccessToken) {
        *self.cached.write() = Some(token.clone());
    }
}

#[async_trait]
impl TokenCredential for ChainedCredential {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        if let Some(token) = self.cached.read().clone() {
            if token.is_fresh(Utc::now()) {
                return Ok(token);
            }
        }

        let selected = *self.selected.read();
        if let Some(source) = selected.and_then(|i| self.sources.get(i)) {
            debug!(source = source.name(), "Refreshing storage token");
            let token = source.get_token(scope).await?;
            self.store(&token);
            return Ok(token);
        }

        let mut attempts = Vec::with_capacity(self.sources.len());
        for (index, source) in self.sources.iter().enumerate() {
            match source.get_token(scope).await {
                Ok(token) => {
                    info!(source = source.name(), "Storage credential resolved");
                    *self.selected.write() = Some(index);
                    self.store(&token);
                    return Ok(token);
                }
                Err(e) => {
                    debug!(source = source.name(), error = %e, "Credential source failed");
                    attempts.push(format!("{}: {}", source.name(), e));
                }
            }
        }

        warn!(attempts = attempts.len(), "No credential source produced a token");
        Err(StorageError::Credential(format!(
            "no credential source produced a token ({})",
            attempts.join("; ")
        )))
    }
}
