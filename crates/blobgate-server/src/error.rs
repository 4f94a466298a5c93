//! Error types and client-facing error codes

use crate::auth::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use blobgate_core::GatewayError;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

/// Error codes rendered to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthorized,
    NoFile,
    FileTooLarge,
    ConfigurationError,
    StorageUnavailable,
    StorageDenied,
    UploadFailed,
    ListFailed,
    InternalError,
}

impl ErrorCode {
    /// Short title sent as the `error` field
    pub fn title(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Unauthorized",
            Self::NoFile => "No file provided",
            Self::FileTooLarge => "File too large",
            Self::ConfigurationError => "Configuration error",
            Self::StorageUnavailable => "Storage unavailable",
            Self::StorageDenied => "Storage access denied",
            Self::UploadFailed => "Upload failed",
            Self::ListFailed => "Failed to retrieve files",
            Self::InternalError => "Internal server error",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NoFile | Self::FileTooLarge => StatusCode::BAD_REQUEST,
            Self::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ConfigurationError
            | Self::StorageDenied
            | Self::UploadFailed
            | Self::ListFailed
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Which operation a gateway failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    List,
    Other,
}

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{}: {message}", .code.title())]
    Api { code: ErrorCode, message: String },
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    pub fn missing_token() -> Self {
        Self::new(ErrorCode::Unauthorized, "No authorization token provided")
    }

    pub fn invalid_token() -> Self {
        Self::new(ErrorCode::Unauthorized, "Invalid token")
    }

    pub fn file_too_large(max: u64) -> Self {
        Self::new(
            ErrorCode::FileTooLarge,
            format!(
                "File size exceeds maximum allowed size of {}MB",
                GatewayError::max_mib(max)
            ),
        )
    }

    /// Map a gateway failure of `operation` to a client response
    pub fn from_gateway(err: GatewayError, operation: Operation) -> Self {
        match err {
            GatewayError::NoFile => Self::new(
                ErrorCode::NoFile,
                r#"Please include a file in the request with key "file""#,
            ),
            GatewayError::SizeExceeded { max, .. } => Self::file_too_large(max),
            GatewayError::Configuration(detail) => {
                Self::new(ErrorCode::ConfigurationError, detail)
            }
            GatewayError::CredentialUnavailable(detail) => {
                error!(%detail, "No storage credential source produced a token");
                Self::new(
                    ErrorCode::ConfigurationError,
                    "Storage credentials could not be resolved",
                )
            }
            GatewayError::StorageUnavailable(detail) => {
                debug!(%detail, "Storage unavailable");
                Self::new(
                    ErrorCode::StorageUnavailable,
                    "The storage service is temporarily unavailable, please retry later",
                )
            }
            GatewayError::StorageDenied(detail) => {
                error!(%detail, "Storage rejected the service credential");
                Self::new(
                    ErrorCode::StorageDenied,
                    "The service is not permitted to access storage",
                )
            }
            GatewayError::Storage(detail) | GatewayError::ContentRead(detail) => {
                error!(%detail, ?operation, "Storage operation failed");
                match operation {
                    Operation::Upload => {
                        Self::new(ErrorCode::UploadFailed, "The file could not be stored")
                    }
                    Operation::List => {
                        Self::new(ErrorCode::ListFailed, "The file list could not be retrieved")
                    }
                    Operation::Other => {
                        Self::new(ErrorCode::InternalError, "An unexpected error occurred")
                    }
                }
            }
        }
    }

    /// Get the error code
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Api { code, .. } => *code,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.error_code().status_code()
    }

    /// Client-facing detail
    pub fn message(&self) -> &str {
        match self {
            Self::Api { message, .. } => message,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken => Self::missing_token(),
            _ => Self::invalid_token(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self::from_gateway(err, Operation::Other)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error_code();
        let body = json!({
            "error": code.title(),
            "message": self.message(),
        });
        (code.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(GatewayError::NoFile, StatusCode::BAD_REQUEST, "No file provided")]
    #[case(GatewayError::SizeExceeded { size: 60, max: 52_428_800 }, StatusCode::BAD_REQUEST, "File too large")]
    #[case(GatewayError::Configuration("AZURE_STORAGE_ACCOUNT_NAME is not set".into()), StatusCode::INTERNAL_SERVER_ERROR, "Configuration error")]
    #[case(GatewayError::CredentialUnavailable("az: not logged in".into()), StatusCode::INTERNAL_SERVER_ERROR, "Configuration error")]
    #[case(GatewayError::StorageUnavailable("503".into()), StatusCode::SERVICE_UNAVAILABLE, "Storage unavailable")]
    #[case(GatewayError::StorageDenied("403".into()), StatusCode::INTERNAL_SERVER_ERROR, "Storage access denied")]
    #[case(GatewayError::Storage("boom".into()), StatusCode::INTERNAL_SERVER_ERROR, "Upload failed")]
    fn test_upload_error_mapping(
        #[case] err: GatewayError,
        #[case] status: StatusCode,
        #[case] title: &str,
    ) {
        let api = ApiError::from_gateway(err, Operation::Upload);
        assert_eq!(api.status(), status);
        assert_eq!(api.error_code().title(), title);
    }

    #[test]
    fn test_messages() {
        let api = ApiError::from_gateway(
            GatewayError::SizeExceeded {
                size: 1,
                max: 52_428_800,
            },
            Operation::Upload,
        );
        assert_eq!(api.message(), "File size exceeds maximum allowed size of 50MB");

        let api = ApiError::from_gateway(GatewayError::Storage("socket reset".into()), Operation::List);
        assert_eq!(api.error_code().title(), "Failed to retrieve files");
        assert!(!api.message().contains("socket"));

        let api = ApiError::from_gateway(
            GatewayError::Configuration("AZURE_STORAGE_CONTAINER_NAME is not set".into()),
            Operation::List,
        );
        assert!(api.message().contains("AZURE_STORAGE_CONTAINER_NAME"));
    }

    #[tokio::test]
    async fn test_credential_failure_detail_stays_server_side() {
        use blobgate_core::{GatewaySettings, Identity, StorageGateway};
        use blobgate_storage::{
            AzureBlobConfig, AzureProvider, ChainedCredential, ClientSecretCredential,
            TokenCredential,
        };
        use std::sync::Arc;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let authority = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided for app 'c0ffee'"
            })))
            .mount(&authority)
            .await;

        let secret = ClientSecretCredential::new("tenant", "c0ffee", "wrong")
            .with_authority_host(authority.uri());
        let chain = ChainedCredential::new(vec![Arc::new(secret) as Arc<dyn TokenCredential>]);
        let provider = AzureProvider::with_credential(
            AzureBlobConfig::new("acct", "uploads"),
            Arc::new(chain),
        );
        let gw = StorageGateway::new(GatewaySettings::default(), Arc::new(provider));

        let err = gw.list_all(&Identity::new("u1")).await.unwrap_err();
        let api = ApiError::from_gateway(err, Operation::List);

        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.error_code().title(), "Configuration error");
        assert_eq!(api.message(), "Storage credentials could not be resolved");
        assert!(!api.message().contains("AADSTS"));
        assert!(!api.message().contains("c0ffee"));
    }

    #[rstest]
    #[case(AuthError::MissingToken, "No authorization token provided")]
    #[case(AuthError::MalformedToken("3 segments".into()), "Invalid token")]
    #[case(AuthError::InvalidSignature("kid".into()), "Invalid token")]
    #[case(AuthError::MissingRequiredClaim, "Invalid token")]
    #[case(AuthError::Expired, "Invalid token")]
    fn test_auth_errors_are_uniform(#[case] err: AuthError, #[case] message: &str) {
        let api = ApiError::from(err);
        assert_eq!(api.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(api.message(), message);
    }
}
