//! API error types and HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use lakeside_lake::LakeError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
    /// Optional per-field details (validation failures).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

/// HTTP API error with a stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Vec<String>>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    /// 400 with per-field validation details.
    #[must_use]
    pub fn validation(message: impl Into<String>, details: Vec<String>) -> Self {
        let mut err = Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message);
        err.details = Some(details);
        err
    }

    /// 400 for malformed requests.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 503 for a missing or malformed schema on the gateway path.
    pub fn schema_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SCHEMA_UNAVAILABLE",
            message,
        )
    }

    /// 500 with the generic internal code.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Returns the HTTP status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<LakeError> for ApiError {
    fn from(err: LakeError) -> Self {
        let message = err.to_string();
        match err {
            LakeError::Busy { .. } => Self::new(StatusCode::CONFLICT, "BUSY", message),
            LakeError::SchemaUnavailable { .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SCHEMA_UNAVAILABLE",
                message,
            ),
            LakeError::PartitionReadFailed { .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "PARTITION_READ_FAILED",
                message,
            ),
            LakeError::EncodeFailed { .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ENCODE_FAILED",
                message,
            ),
            LakeError::LogContention { .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "LOG_CONTENTION",
                message,
            ),
            LakeError::Storage { .. } | LakeError::Serialization { .. } => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code.to_string(),
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}
