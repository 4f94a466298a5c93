//! HTTP middleware for authentication, request ids and request logging

use crate::auth::{bearer_token, ClaimsExtractor};
use crate::{ApiError, AppState};
use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use blobgate_core::Identity;
use std::sync::Arc;
use tracing::{debug, warn};

/// Header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Result of authenticating one request
#[derive(Clone, Debug, PartialEq)]
pub enum GateOutcome {
    /// Allow-listed path; no identity attached
    Passthrough,
    /// Token accepted
    Authenticated(Identity),
}

/// Request-scoped authentication gate
///
/// Paths on the allow-list pass untouched. Everything else needs a bearer
/// token the [`ClaimsExtractor`] accepts. Nothing is cached between requests.
pub struct AuthGate {
    public_paths: Vec<String>,
    extractor: Arc<ClaimsExtractor>,
}

impl AuthGate {
    pub fn new(public_paths: Vec<String>, extractor: Arc<ClaimsExtractor>) -> Self {
        let public_paths = public_paths
            .into_iter()
            .map(|p| p.trim().trim_end_matches('/').to_string())
            .collect();
        Self {
            public_paths,
            extractor,
        }
    }

    /// Whether `path` is on the allow-list
    ///
    /// An entry matches itself (with or without trailing `/`) and any path
    /// below it; `/api/health` does not match `/api/healthcheck`.
    pub fn is_public(&self, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        self.public_paths.iter().any(|allowed| {
            path == allowed
                || path
                    .strip_prefix(allowed.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Decide what happens to a request for `path` with `headers`
    pub async fn authenticate(&self, path: &str, headers: &HeaderMap) -> Result<GateOutcome, ApiError> {
        if self.is_public(path) {
            return Ok(GateOutcome::Passthrough);
        }

        let token = headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| {
                debug!(path, "Request without bearer token");
                ApiError::missing_token()
            })?;

        match self.extractor.extract(token).await {
            Ok(identity) => Ok(GateOutcome::Authenticated(identity)),
            Err(e) => {
                warn!(path, error = %e, "Rejected bearer token");
                Err(ApiError::from(e))
            }
        }
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let outcome = state
        .auth_gate
        .authenticate(request.uri().path(), request.headers())
        .await?;

    if let GateOutcome::Authenticated(identity) = outcome {
        debug!(user_id = %identity.user_id, "Authenticated request");
        request.extensions_mut().insert(identity);
    }

    Ok(next.run(request).await)
}

/// Request ID extension
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Request ID middleware - reuses the caller's `x-request-id` or mints one
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "Request completed"
    );

    response
}
