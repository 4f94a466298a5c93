//! Token signature verification strategies

use super::AuthError;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Algorithms accepted in token headers
pub const SUPPORTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::HS256,
    Algorithm::HS384,
    Algorithm::HS512,
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
];

/// Shortest gap between two refreshes triggered by unknown key ids
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Microsoft identity platform host
pub const MICROSOFT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Decides whether a token's signature is acceptable
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Accept or reject `token`
    async fn verify(&self, token: &str) -> Result<(), AuthError>;
}

/// Accepts every token without looking at the signature
///
/// Development only. Anyone can mint a token that passes.
pub struct UnverifiedVerifier;

impl UnverifiedVerifier {
    pub fn new() -> Self {
        warn!("Token signatures are NOT verified; this mode is for local development only");
        Self
    }
}

impl Default for UnverifiedVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenVerifier for UnverifiedVerifier {
    fn name(&self) -> &'static str {
        "unverified"
    }

    async fn verify(&self, _token: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Where the issuer's key set is found
#[derive(Clone, Debug)]
pub enum JwksSource {
    /// Read `jwks_uri` from `{issuer}/.well-known/openid-configuration`
    Discovery { issuer: String },
    /// Fixed key set URL
    Url(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeyFamily {
    Rsa,
    Hmac,
}

impl KeyFamily {
    fn of(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => Some(Self::Rsa),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Some(Self::Hmac),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct JwkEntry {
    key: DecodingKey,
    family: KeyFamily,
}

/// Verifies signatures against the issuer's published key set
///
/// Keys are cached by `kid`. An unknown `kid` triggers one refresh of the
/// whole set before the token is rejected, which picks up rotated keys.
/// Such refreshes run one at a time and at most once per
/// `min_refresh_interval`; concurrent misses wait for the running fetch.
pub struct JwksVerifier {
    client: reqwest::Client,
    source: JwksSource,
    issuer: Option<String>,
    audience: Option<String>,
    jwks_uri: OnceCell<String>,
    keys: RwLock<HashMap<String, JwkEntry>>,
    min_refresh_interval: Duration,
    last_refresh: Mutex<Option<Instant>>,
}

impl JwksVerifier {
    pub fn new(source: JwksSource) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            source,
            issuer: None,
            audience: None,
            jwks_uri: OnceCell::new(),
            keys: RwLock::new(HashMap::new()),
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            last_refresh: Mutex::new(None),
        }
    }

    /// Verifier for a Microsoft Entra tenant; `client_id` is the expected audience
    pub fn for_tenant(tenant_id: &str, client_id: Option<&str>) -> Self {
        let issuer = format!("{}/{}/v2.0", MICROSOFT_AUTHORITY, tenant_id);
        let mut verifier = Self::new(JwksSource::Discovery {
            issuer: issuer.clone(),
        })
        .issuer(issuer);
        if let Some(aud) = client_id {
            verifier = verifier.audience(aud);
        }
        verifier
    }

    /// Require this `iss` claim
    pub fn issuer(mut self, iss: impl Into<String>) -> Self {
        self.issuer = Some(iss.into());
        self
    }

    /// Require this `aud` claim
    pub fn audience(mut self, aud: impl Into<String>) -> Self {
        self.audience = Some(aud.into());
        self
    }

    /// Throttle refreshes caused by unknown key ids
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Number of keys currently cached
    pub fn cached_keys(&self) -> usize {
        self.keys.read().len()
    }

    fn lookup(&self, kid: &str) -> Option<JwkEntry> {
        self.keys.read().get(kid).cloned()
    }

    async fn get_json(&self, url: &str) -> Result<Value, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("GET {} failed: {}", url, e))?;
        if !response.status().is_success() {
            return Err(format!("GET {} returned {}", url, response.status()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| format!("GET {} returned invalid JSON: {}", url, e))
    }

    async fn key_set_url(&self) -> Result<&String, String> {
        self.jwks_uri
            .get_or_try_init(|| async {
                match &self.source {
                    JwksSource::Url(url) => Ok(url.clone()),
                    JwksSource::Discovery { issuer } => {
                        let url = format!(
                            "{}/.well-known/openid-configuration",
                            issuer.trim_end_matches('/')
                        );
                        let document = self.get_json(&url).await?;
                        let jwks_uri = document
                            .get("jwks_uri")
                            .and_then(Value::as_str)
                            .ok_or_else(|| format!("{} has no jwks_uri", url))?;
                        info!(%jwks_uri, "Discovered signing key set");
                        Ok(jwks_uri.to_string())
                    }
                }
            })
            .await
    }

    /// Fetch the key set and replace the cache
    pub async fn refresh(&self) -> Result<usize, String> {
        let url = self.key_set_url().await?.clone();
        let document = self.get_json(&url).await?;
        let keys = parse_key_set(&document);
        let count = keys.len();
        *self.keys.write() = keys;
        debug!(keys = count, "Signing key set refreshed");
        Ok(count)
    }

    /// Resolve `kid`, refreshing the set if it is unknown and no refresh ran recently
    async fn lookup_or_refresh(&self, kid: &str) -> Result<Option<JwkEntry>, String> {
        let mut last = self.last_refresh.lock().await;

        // Another task may have fetched the key while this one waited
        if let Some(entry) = self.lookup(kid) {
            return Ok(Some(entry));
        }
        if let Some(at) = *last {
            if at.elapsed() < self.min_refresh_interval {
                debug!(kid, "Key set refreshed recently, not fetching again");
                return Ok(None);
            }
        }

        *last = Some(Instant::now());
        self.refresh().await?;
        Ok(self.lookup(kid))
    }
}

/// Decoding keys of a JWKS document, by `kid`
///
/// RSA and symmetric `oct` keys are understood; anything else is skipped.
fn parse_key_set(document: &Value) -> HashMap<String, JwkEntry> {
    let mut keys = HashMap::new();
    let Some(entries) = document.get("keys").and_then(Value::as_array) else {
        return keys;
    };

    for jwk in entries {
        let field = |name: &str| jwk.get(name).and_then(Value::as_str);
        let Some(kid) = field("kid") else {
            continue;
        };
        let kty = field("kty").unwrap_or_default();
        let alg = field("alg").unwrap_or_default();

        if kty.eq_ignore_ascii_case("RSA") && (alg.is_empty() || alg.starts_with("RS")) {
            let (Some(n), Some(e)) = (field("n"), field("e")) else {
                continue;
            };
            if let Ok(key) = DecodingKey::from_rsa_components(n, e) {
                keys.insert(
                    kid.to_string(),
                    JwkEntry {
                        key,
                        family: KeyFamily::Rsa,
                    },
                );
            }
        } else if kty.eq_ignore_ascii_case("oct") && (alg.is_empty() || alg.starts_with("HS")) {
            let Some(secret) = field("k").and_then(|k| URL_SAFE_NO_PAD.decode(k).ok()) else {
                continue;
            };
            keys.insert(
                kid.to_string(),
                JwkEntry {
                    key: DecodingKey::from_secret(&secret),
                    family: KeyFamily::Hmac,
                },
            );
        }
    }
    keys
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    fn name(&self) -> &'static str {
        "jwks"
    }

    async fn verify(&self, token: &str) -> Result<(), AuthError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::MalformedToken(format!("bad header: {}", e)))?;

        if !SUPPORTED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::InvalidSignature(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidSignature("header has no kid".to_string()))?;

        let entry = match self.lookup(&kid) {
            Some(entry) => entry,
            None => self
                .lookup_or_refresh(&kid)
                .await
                .map_err(|e| {
                    warn!(error = %e, "Signing key set refresh failed");
                    AuthError::InvalidSignature(format!("key set unavailable: {}", e))
                })?
                .ok_or_else(|| AuthError::InvalidSignature(format!("unknown kid {}", kid)))?,
        };

        if KeyFamily::of(header.alg) != Some(entry.family) {
            return Err(AuthError::InvalidSignature(format!(
                "algorithm {:?} does not match key {}",
                header.alg, kid
            )));
        }

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        if let Some(iss) = &self.issuer {
            validation.set_issuer(&[iss]);
        }

        jsonwebtoken::decode::<Value>(token, &entry.key, &validation)
            .map(|_| ())
            .map_err(|e| AuthError::InvalidSignature(e.to_string()))
    }
}
