//! File upload handler

use crate::error::{ApiError, Operation};
use crate::AppState;
use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        Extension, Multipart, State,
    },
    http::{header::CONTENT_LENGTH, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use blobgate_core::{GatewayError, Identity, NewUpload};
use futures::TryStreamExt;
use serde_json::json;
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// Multipart field carrying the file
pub const FILE_FIELD: &str = "file";

/// Room left for boundaries and part headers when the request length stands in for the file size
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// POST /api/upload/ - Store one file for the authenticated caller
///
/// The `file` part is streamed into the gateway. Its size is estimated up
/// front from the part's or the request's `Content-Length`, so oversized
/// uploads are refused before any content is read.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let max = state.gateway.settings().max_upload_size;

    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            debug!(error = %rejection, "Upload is not a multipart request");
            return Err(no_file());
        }
    };

    // Advance to the `file` field; other fields are skipped
    let field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, max))?
        {
            Some(field) if field.name() == Some(FILE_FIELD) => break Some(field),
            Some(_) => continue,
            None => break None,
        }
    };
    let Some(field) = field else {
        return Err(no_file());
    };

    let filename = field.file_name().unwrap_or_default().to_string();
    let content_type = field.content_type().unwrap_or_default().to_string();
    let declared_size = declared_size(&headers, &field);
    debug!(%filename, declared_size, "Receiving upload");

    let upload = NewUpload::new(filename, field.map_err(content_error), declared_size)
        .with_content_type(content_type);
    let result = state.gateway.upload(&identity, upload).await;

    if let Err(GatewayError::SizeExceeded { .. }) = &result {
        discard_remaining(&mut multipart).await;
    }
    let stored = result.map_err(|e| ApiError::from_gateway(e, Operation::Upload))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "File uploaded successfully",
            "data": {
                "success": true,
                "blob_name": stored.key,
                "blob_url": stored.url,
                "original_filename": stored.original_filename,
                "size": stored.size_bytes,
                "content_type": stored.content_type,
                "uploaded_at": stored.created_at.to_rfc3339(),
            }
        })),
    )
        .into_response())
}

fn no_file() -> ApiError {
    ApiError::from_gateway(GatewayError::NoFile, Operation::Upload)
}

/// Size the client announced for the file part
///
/// A part-level `Content-Length` is exact. Otherwise the request length,
/// less the multipart framing allowance, is a lower bound on the file size.
fn declared_size(headers: &HeaderMap, field: &Field<'_>) -> u64 {
    let content_length = |map: &HeaderMap| {
        map.get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    content_length(field.headers())
        .or_else(|| content_length(headers).map(|len| len.saturating_sub(MULTIPART_OVERHEAD)))
        .unwrap_or(0)
}

fn content_error(err: MultipartError) -> io::Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        io::Error::new(io::ErrorKind::FileTooLarge, err.body_text())
    } else {
        io::Error::other(err.body_text())
    }
}

/// Read the rest of a rejected body without keeping it, so the client gets the response
async fn discard_remaining(multipart: &mut Multipart) {
    while let Ok(Some(_)) = multipart.next_field().await {}
}

fn multipart_error(err: MultipartError, max: u64) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(error = %err, "Upload body over the request limit");
        return ApiError::file_too_large(max);
    }
    warn!(error = %err, "Malformed multipart body");
    no_file()
}
