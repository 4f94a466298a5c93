//! Stored object metadata and upload requests

use blobgate_storage::{BlobItem, BlobProperties, DEFAULT_CONTENT_TYPE, ORIGINAL_FILENAME_META};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata of an object written through the gateway
///
/// Objects are write-once; this is a snapshot of what the backend reported.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredObjectMetadata {
    /// Object key, `{owner}/{YYYYMMDD_HHMMSS}_{uuid}{.ext}`
    pub key: String,
    /// Backend retrieval URL
    pub url: String,
    /// File name supplied by the client
    pub original_filename: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// MIME type recorded with the object
    pub content_type: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time, when the backend reports one
    pub last_modified: Option<DateTime<Utc>>,
}

impl StoredObjectMetadata {
    /// Metadata for an object just written
    pub fn from_put(props: BlobProperties, original_filename: impl Into<String>) -> Self {
        Self {
            key: props.name,
            url: props.url,
            original_filename: original_filename.into(),
            size_bytes: props.size,
            content_type: props.content_type,
            created_at: props.created_on,
            last_modified: Some(props.created_on),
        }
    }

    /// Metadata for an entry of a listing
    pub fn from_listing(item: BlobItem, url: String) -> Self {
        let original_filename = item
            .metadata
            .get(ORIGINAL_FILENAME_META)
            .cloned()
            .unwrap_or_else(|| file_part(&item.name).to_string());

        Self {
            created_at: item
                .created_on
                .or(item.last_modified)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            last_modified: item.last_modified,
            content_type: item
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size_bytes: item.size,
            original_filename,
            url,
            key: item.name,
        }
    }
}

fn file_part(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// An upload as handed over by the boundary layer
pub struct NewUpload<S> {
    /// Client file name; empty means no file was sent
    pub filename: String,
    /// Content stream; `None` means no file part was present
    pub content: Option<S>,
    /// Size announced by the client, checked before any byte is read
    pub declared_size: u64,
    /// MIME type announced by the client, possibly empty
    pub content_type: String,
}

impl<S> NewUpload<S> {
    pub fn new(filename: impl Into<String>, content: S, declared_size: u64) -> Self {
        Self {
            filename: filename.into(),
            content: Some(content),
            declared_size,
            content_type: String::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_listing_falls_back_to_key_and_last_modified() {
        let modified = Utc::now();
        let item = BlobItem {
            name: "u1/20240101_120000_abc.txt".to_string(),
            size: 4,
            content_type: None,
            created_on: None,
            last_modified: Some(modified),
            metadata: HashMap::new(),
        };

        let meta = StoredObjectMetadata::from_listing(item, "memory://x".to_string());
        assert_eq!(meta.original_filename, "20240101_120000_abc.txt");
        assert_eq!(meta.created_at, modified);
        assert_eq!(meta.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_listing_prefers_recorded_filename() {
        let mut metadata = HashMap::new();
        metadata.insert(ORIGINAL_FILENAME_META.to_string(), "report.pdf".to_string());
        let item = BlobItem {
            name: "u1/20240101_120000_abc.pdf".to_string(),
            size: 4,
            content_type: Some("application/pdf".to_string()),
            created_on: Some(Utc::now()),
            last_modified: None,
            metadata,
        };

        let meta = StoredObjectMetadata::from_listing(item, String::new());
        assert_eq!(meta.original_filename, "report.pdf");
        assert_eq!(meta.content_type, "application/pdf");
    }
}
