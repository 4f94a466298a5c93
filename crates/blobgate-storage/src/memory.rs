//! In-memory blob store for testing and development

use crate::{
    BlobBackend, BlobItem, BlobPage, BlobProperties, Result, StorageError, DEFAULT_PAGE_SIZE,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug)]
struct StoredBlob {
    data: Bytes,
    content_type: String,
    created_on: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

/// An in-memory blob container
///
/// Listing is sorted by name and paginated like the real service, so
/// callers that follow continuation markers are exercised in tests.
#[derive(Clone)]
pub struct MemoryBlobStore {
    blobs: Arc<DashMap<String, StoredBlob>>,
    page_size: usize,
    base_url: String,
    puts: Arc<AtomicUsize>,
    lists: Arc<AtomicUsize>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(DashMap::new()),
            page_size: DEFAULT_PAGE_SIZE as usize,
            base_url: "memory://blobgate".to_string(),
            puts: Arc::new(AtomicUsize::new(0)),
            lists: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the number of items returned per listing page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Get the number of blobs stored
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Number of `put_blob` calls that reached the store
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of listing pages served
    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    /// Raw contents of a blob
    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.blobs.get(name).map(|entry| entry.data.clone())
    }

    /// Insert a blob directly, bypassing the put counter
    pub fn insert(&self, name: impl Into<String>, data: impl Into<Bytes>, content_type: &str) {
        self.blobs.insert(
            name.into(),
            StoredBlob {
                data: data.into(),
                content_type: content_type.to_string(),
                created_on: Utc::now(),
                metadata: HashMap::new(),
            },
        );
    }
}

#[async_trait]
impl BlobBackend for MemoryBlobStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn blob_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    async fn put_blob(
        &self,
        name: &str,
        data: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<BlobProperties> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if name.is_empty() {
            return Err(StorageError::BlobApi("empty blob name".to_string()));
        }

        let created_on = Utc::now();
        let size = data.len() as u64;
        self.blobs.insert(
            name.to_string(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
                created_on,
                metadata: metadata.clone(),
            },
        );

        Ok(BlobProperties {
            name: name.to_string(),
            url: self.blob_url(name),
            size,
            content_type: content_type.to_string(),
            created_on,
        })
    }

    async fn list_blobs(&self, prefix: &str, marker: Option<&str>) -> Result<BlobPage> {
        self.lists.fetch_add(1, Ordering::SeqCst);

        let mut names: Vec<String> = self
            .blobs
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .filter(|entry| marker.map_or(true, |m| entry.key().as_str() > m))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();

        let has_more = names.len() > self.page_size;
        names.truncate(self.page_size);

        let items: Vec<BlobItem> = names
            .iter()
            .filter_map(|name| {
                self.blobs.get(name).map(|blob| BlobItem {
                    name: name.clone(),
                    size: blob.data.len() as u64,
                    content_type: Some(blob.content_type.clone()),
                    created_on: Some(blob.created_on),
                    last_modified: Some(blob.created_on),
                    metadata: blob.metadata.clone(),
                })
            })
            .collect();

        let next_marker = if has_more {
            items.last().map(|item| item.name.clone())
        } else {
            None
        };

        Ok(BlobPage { items, next_marker })
    }
}
