//! Service health

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// GET /api/health/ - Liveness check, served without authentication
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "message": "File upload service is running",
        })),
    )
}
