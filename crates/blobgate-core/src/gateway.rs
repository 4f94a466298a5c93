//! Owner-scoped upload and listing over a blob backend

use crate::error::{GatewayError, Result};
use crate::identity::Identity;
use crate::metadata::{NewUpload, StoredObjectMetadata};
use blobgate_storage::{
    BackendProvider, BlobBackend, StaticProvider, DEFAULT_CONTENT_TYPE, ORIGINAL_FILENAME_META,
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default upload limit: 50 MiB
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;

/// Longest file extension carried over into object keys
pub const MAX_EXTENSION_LEN: usize = 16;

/// Tunables for the gateway
#[derive(Clone, Debug)]
pub struct GatewaySettings {
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
    /// Extra attempts for transient backend failures
    pub transient_retries: u32,
    /// Delay before the first retry; doubled on every further attempt
    pub retry_backoff: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            transient_retries: 0,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Key prefix owned by `user_id`
///
/// The id is kept verbatim except for `%` and `/`, which are percent-encoded
/// so a `/` inside it cannot open a path segment that belongs to another owner.
pub fn owner_prefix(user_id: &str) -> String {
    format!("{}/", user_id.replace('%', "%25").replace('/', "%2F"))
}

/// Extension of `filename` including the dot, if it is safe to keep
pub fn sanitize_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{}", ext))
}

/// Build a fresh object key for `filename` owned by `user_id`
pub fn object_key(user_id: &str, filename: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}{}_{}{}",
        owner_prefix(user_id),
        now.format("%Y%m%d_%H%M%S"),
        Uuid::new_v4(),
        sanitize_extension(filename).unwrap_or_default()
    )
}

/// Upload and list files on behalf of authenticated owners
///
/// The backend is resolved on first use and then shared by every request.
/// A failed resolution is not remembered, so the next call tries again.
pub struct StorageGateway {
    settings: GatewaySettings,
    provider: Arc<dyn BackendProvider>,
    backend: OnceCell<Arc<dyn BlobBackend>>,
}

impl StorageGateway {
    /// Gateway that resolves its backend lazily through `provider`
    pub fn new(settings: GatewaySettings, provider: Arc<dyn BackendProvider>) -> Self {
        Self {
            settings,
            provider,
            backend: OnceCell::new(),
        }
    }

    /// Gateway over an already constructed backend
    pub fn with_backend(settings: GatewaySettings, backend: Arc<dyn BlobBackend>) -> Self {
        Self {
            settings,
            provider: Arc::new(StaticProvider(Arc::clone(&backend))),
            backend: OnceCell::new_with(Some(backend)),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Whether the backend has been resolved yet
    pub fn is_connected(&self) -> bool {
        self.backend.initialized()
    }

    async fn backend(&self) -> Result<&Arc<dyn BlobBackend>> {
        self.backend
            .get_or_try_init(|| async {
                let backend = self.provider.connect().await.map_err(|e| {
                    warn!(error = %e, "Storage backend resolution failed");
                    GatewayError::from(e)
                })?;
                info!(backend = backend.backend_name(), "Storage backend ready");
                Ok(backend)
            })
            .await
    }

    async fn with_retries<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = blobgate_storage::Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.settings.transient_retries => {
                    let delay = self.settings.retry_backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(operation, attempt, error = %e, "Transient storage failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Store an upload under a fresh key owned by `owner`
    #[instrument(skip(self, owner, upload), fields(owner = %owner.user_id, filename = %upload.filename))]
    pub async fn upload<S>(
        &self,
        owner: &Identity,
        upload: NewUpload<S>,
    ) -> Result<StoredObjectMetadata>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send,
    {
        let NewUpload {
            filename,
            content,
            declared_size,
            content_type,
        } = upload;

        if filename.trim().is_empty() {
            return Err(GatewayError::NoFile);
        }
        let content = content.ok_or(GatewayError::NoFile)?;

        let max = self.settings.max_upload_size;
        if declared_size > max {
            return Err(GatewayError::SizeExceeded {
                size: declared_size,
                max,
            });
        }

        let backend = self.backend().await?;
        let data = read_limited(content, declared_size, max).await?;

        let key = object_key(&owner.user_id, &filename, Utc::now());
        let content_type = if content_type.trim().is_empty() {
            DEFAULT_CONTENT_TYPE.to_string()
        } else {
            content_type
        };
        let mut metadata = HashMap::new();
        metadata.insert(ORIGINAL_FILENAME_META.to_string(), filename.clone());

        let props = self
            .with_retries("put_blob", || {
                backend.put_blob(&key, data.clone(), &content_type, &metadata)
            })
            .await?;

        info!(key = %props.name, size = props.size, "Upload stored");
        Ok(StoredObjectMetadata::from_put(props, filename))
    }

    /// Lazily enumerate every object owned by `owner`
    ///
    /// Continuation markers are followed transparently. The stream is
    /// finite, and calling `list` again starts a new enumeration.
    pub fn list<'a>(&'a self, owner: &Identity) -> BoxStream<'a, Result<StoredObjectMetadata>> {
        enum Cursor {
            Start,
            Next(String),
            Done,
        }

        let prefix = owner_prefix(&owner.user_id);
        debug!(%prefix, "Listing objects");

        stream::try_unfold(Cursor::Start, move |cursor| {
            let prefix = prefix.clone();
            async move {
                let marker = match cursor {
                    Cursor::Done => return Ok::<_, GatewayError>(None),
                    Cursor::Start => None,
                    Cursor::Next(marker) => Some(marker),
                };

                let backend = self.backend().await?;
                let page = self
                    .with_retries("list_blobs", || {
                        backend.list_blobs(&prefix, marker.as_deref())
                    })
                    .await?;

                let entries: Vec<StoredObjectMetadata> = page
                    .items
                    .into_iter()
                    .filter(|item| item.name.starts_with(&prefix))
                    .map(|item| {
                        let url = backend.blob_url(&item.name);
                        StoredObjectMetadata::from_listing(item, url)
                    })
                    .collect();

                let next = match page.next_marker {
                    Some(next) if Some(&next) != marker.as_ref() => Cursor::Next(next),
                    _ => Cursor::Done,
                };
                Ok(Some((entries, next)))
            }
        })
        .map_ok(|entries| stream::iter(entries.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    /// Collect the whole listing of `owner`
    pub async fn list_all(&self, owner: &Identity) -> Result<Vec<StoredObjectMetadata>> {
        self.list(owner).try_collect().await
    }
}

/// Read `content` into memory, failing as soon as more than `max` bytes arrive
///
/// A `FileTooLarge` read error counts as exceeding the limit.
async fn read_limited<S>(content: S, declared_size: u64, max: u64) -> Result<Bytes>
where
    S: Stream<Item = std::io::Result<Bytes>> + Send,
{
    let mut content = std::pin::pin!(content);
    let mut buffer = BytesMut::with_capacity(declared_size.min(max) as usize);

    while let Some(chunk) = content.try_next().await.map_err(|e| match e.kind() {
        // The source stopped at its own limit
        std::io::ErrorKind::FileTooLarge => GatewayError::SizeExceeded {
            size: max.saturating_add(1),
            max,
        },
        _ => GatewayError::ContentRead(e.to_string()),
    })? {
        let size = (buffer.len() + chunk.len()) as u64;
        if size > max {
            return Err(GatewayError::SizeExceeded { size, max });
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer.freeze())
}
