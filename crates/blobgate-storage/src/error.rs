//! Error types for the blobgate-storage crate

use thiserror::Error;

/// Result type alias using `StorageError`
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during blob storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Blob or container not found
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend rejected the caller's credentials or permissions
    #[error("access denied by storage backend: {0}")]
    Denied(String),

    /// The backend reported a transient failure (throttling, 5xx)
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Timeout error
    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Blob service API error that fits no other class
    #[error("blob service error: {0}")]
    BlobApi(String),

    /// No credential source could produce a token
    #[error("credential error: {0}")]
    Credential(String),

    /// Required setting is absent or invalid
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(String),
}

impl StorageError {
    /// Classify a non-success HTTP status returned by the blob service.
    pub fn from_status(status: reqwest::StatusCode, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status.as_u16() {
            401 | 403 => StorageError::Denied(detail),
            404 => StorageError::NotFound(detail),
            408 | 429 | 500..=599 => StorageError::Unavailable(detail),
            _ => StorageError::BlobApi(format!("{}: {}", status, detail)),
        }
    }

    /// Whether the failure is worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_) | StorageError::Connection(_) | StorageError::Timeout { .. }
        )
    }

    /// Whether the backend refused the request on authorization grounds
    pub fn is_denied(&self) -> bool {
        matches!(self, StorageError::Denied(_))
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StorageError::Timeout { seconds: 30 }
        } else if err.is_connect() {
            StorageError::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            StorageError::from_status(status, err.to_string())
        } else {
            StorageError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

impl From<quick_xml::DeError> for StorageError {
    fn from(err: quick_xml::DeError) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use rstest::rstest;

    #[rstest]
    #[case(StatusCode::UNAUTHORIZED, true, false)]
    #[case(StatusCode::FORBIDDEN, true, false)]
    #[case(StatusCode::SERVICE_UNAVAILABLE, false, true)]
    #[case(StatusCode::TOO_MANY_REQUESTS, false, true)]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, false, true)]
    #[case(StatusCode::CONFLICT, false, false)]
    fn test_status_classification(
        #[case] status: StatusCode,
        #[case] denied: bool,
        #[case] transient: bool,
    ) {
        let err = StorageError::from_status(status, "boom");
        assert_eq!(err.is_denied(), denied);
        assert_eq!(err.is_transient(), transient);
    }

    #[test]
    fn test_not_found_is_neither() {
        let err = StorageError::from_status(StatusCode::NOT_FOUND, "container missing");
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!err.is_transient());
    }
}
