//! Bearer token authentication
//!
//! [`ClaimsExtractor`] turns an opaque bearer token into an [`Identity`].
//! Signature checking is delegated to a pluggable [`TokenVerifier`].

pub mod verifier;

pub use verifier::{JwksSource, JwksVerifier, TokenVerifier, UnverifiedVerifier};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use blobgate_core::Identity;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// URL-safe base64 that accepts segments with or without padding
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Reasons a token does not yield an identity
///
/// The detail strings are for server logs only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no token provided")]
    MissingToken,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("signature rejected: {0}")]
    InvalidSignature(String),

    #[error("token carries neither oid nor sub")]
    MissingRequiredClaim,

    #[error("token expired")]
    Expired,
}

/// Parses bearer tokens and maps their claims to an [`Identity`]
pub struct ClaimsExtractor {
    verifier: Arc<dyn TokenVerifier>,
    leeway_secs: u64,
}

impl ClaimsExtractor {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            verifier,
            leeway_secs: 0,
        }
    }

    /// Tolerate clock skew when checking `exp`
    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    pub fn verifier_name(&self) -> &'static str {
        self.verifier.name()
    }

    /// Extract the identity carried by `token`
    pub async fn extract(&self, token: &str) -> Result<Identity, AuthError> {
        self.extract_at(token, Utc::now().timestamp()).await
    }

    /// Extract the identity, judging expiry against `now` (unix seconds)
    pub async fn extract_at(&self, token: &str, now: i64) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let claims = decode_payload(token)?;
        self.verifier.verify(token).await?;

        let identity = identity_from_claims(&claims)?;

        if let Some(exp) = claims.get("exp").and_then(Value::as_f64) {
            let leeway = i64::try_from(self.leeway_secs).unwrap_or(i64::MAX);
            let cutoff = now.saturating_sub(leeway) as f64;
            if exp <= cutoff {
                debug!(user_id = %identity.user_id, exp, "Token expired");
                return Err(AuthError::Expired);
            }
        }

        Ok(identity)
    }
}

/// Decode the claims segment of a three-part token
pub fn decode_payload(token: &str) -> Result<Map<String, Value>, AuthError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let bytes = SEGMENT_ENGINE
        .decode(segments[1])
        .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {}", e)))?;

    serde_json::from_slice::<Map<String, Value>>(&bytes)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not a JSON object: {}", e)))
}

fn non_empty_str<'a>(claims: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn identity_from_claims(claims: &Map<String, Value>) -> Result<Identity, AuthError> {
    let user_id = non_empty_str(claims, "oid")
        .or_else(|| non_empty_str(claims, "sub"))
        .ok_or(AuthError::MissingRequiredClaim)?;

    let email = non_empty_str(claims, "preferred_username")
        .or_else(|| non_empty_str(claims, "email"))
        .unwrap_or_default();

    let display_name = non_empty_str(claims, "name").unwrap_or_default();

    let raw_claims: BTreeMap<String, String> = claims
        .iter()
        .map(|(name, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), text)
        })
        .collect();

    Ok(Identity {
        user_id: user_id.to_string(),
        email: email.to_string(),
        display_name: display_name.to_string(),
        raw_claims,
    })
}

/// Token of an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
