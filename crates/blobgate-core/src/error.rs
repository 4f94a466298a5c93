//! Error types for the blobgate-core crate

use blobgate_storage::StorageError;
use thiserror::Error;

/// Result type alias using `GatewayError`
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors produced by gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No file name or no content was supplied
    #[error("no file provided")]
    NoFile,

    /// Upload is larger than the configured limit
    #[error("upload of {size} bytes exceeds the limit of {max} bytes")]
    SizeExceeded { size: u64, max: u64 },

    /// A required setting is missing; the message names the setting
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No credential source produced a storage token
    #[error("storage credentials unavailable: {0}")]
    CredentialUnavailable(String),

    /// The backend is unreachable, timed out, or reported a transient fault
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The backend refused the resolved credential
    #[error("storage access denied: {0}")]
    StorageDenied(String),

    /// Any other backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Reading the upload content failed
    #[error("failed to read upload content: {0}")]
    ContentRead(String),
}

impl GatewayError {
    /// Limit in whole MiB, for client-facing messages
    pub fn max_mib(max: u64) -> u64 {
        max / (1024 * 1024)
    }
}

impl From<StorageError> for GatewayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Configuration(msg) => GatewayError::Configuration(msg),
            StorageError::Credential(msg) => GatewayError::CredentialUnavailable(msg),
            StorageError::Denied(msg) => GatewayError::StorageDenied(msg),
            e if e.is_transient() => GatewayError::StorageUnavailable(e.to_string()),
            e => GatewayError::Storage(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_classes() {
        assert!(matches!(
            GatewayError::from(StorageError::Timeout { seconds: 30 }),
            GatewayError::StorageUnavailable(_)
        ));
        assert!(matches!(
            GatewayError::from(StorageError::Denied("403".into())),
            GatewayError::StorageDenied(_)
        ));
        assert!(matches!(
            GatewayError::from(StorageError::Credential("none".into())),
            GatewayError::CredentialUnavailable(_)
        ));
        assert!(matches!(
            GatewayError::from(StorageError::Configuration("AZURE_STORAGE_ACCOUNT_NAME is not set".into())),
            GatewayError::Configuration(_)
        ));
        assert!(matches!(
            GatewayError::from(StorageError::NotFound("container".into())),
            GatewayError::Storage(_)
        ));
    }

    #[test]
    fn test_max_mib() {
        assert_eq!(GatewayError::max_mib(52_428_800), 50);
    }
}
