//! HTTP route handlers.

pub mod compaction;
pub mod gateway;

use axum::Json;
use axum::response::IntoResponse;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Shallow liveness check, mounted on both services.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
