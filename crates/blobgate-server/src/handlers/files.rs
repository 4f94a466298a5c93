//! File listing handler

use crate::error::{ApiError, Operation};
use crate::AppState;
use axum::{
    extract::{Extension, State},
    response::{IntoResponse, Response},
    Json,
};
use blobgate_core::{Identity, StoredObjectMetadata};
use serde::Serialize;
use std::sync::Arc;

/// One entry of the file listing
#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub created_on: String,
    pub last_modified: Option<String>,
    pub content_type: String,
}

impl From<StoredObjectMetadata> for FileEntry {
    fn from(meta: StoredObjectMetadata) -> Self {
        Self {
            name: meta.key,
            size: meta.size_bytes,
            created_on: meta.created_at.to_rfc3339(),
            last_modified: meta.last_modified.map(|t| t.to_rfc3339()),
            content_type: meta.content_type,
        }
    }
}

/// GET /api/files/ - List every file owned by the caller
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Response, ApiError> {
    let files: Vec<FileEntry> = state
        .gateway
        .list_all(&identity)
        .await
        .map_err(|e| ApiError::from_gateway(e, Operation::List))?
        .into_iter()
        .map(FileEntry::from)
        .collect();

    Ok(Json(serde_json::json!({
        "message": "Files retrieved successfully",
        "count": files.len(),
        "data": files,
    }))
    .into_response())
}
