//! Ingestion gateway routes.
//!
//! `PUT /` stages one validated record; `POST /batch` stages a validated
//! array as a newline-delimited object. The partition is derived here as
//! `{partition_field}={YYYY-MM-DDTHH}` from the current wall clock; the
//! compaction core treats the partition string as opaque.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use lakeside_core::{LakePaths, WritePrecondition};
use lakeside_lake::{LakeError, Record, SchemaDocument, validate_record};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Builds the gateway route table.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", put(put_record))
        .route("/batch", post(post_batch))
        .route("/health", get(super::health))
}

/// Response for accepted staging writes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// The staging key that was written.
    pub key: String,
    /// The derived partition.
    pub partition: String,
    /// Number of records staged.
    pub record_count: usize,
}

/// PUT `/` — validates and stages a single JSON record.
async fn put_record(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<IngestResponse>> {
    let schema = load_schema(&state).await?;
    let record = as_record(body)?;

    validate_record(&schema, &record)
        .map_err(|violations| ApiError::validation("record rejected by schema", violations))?;

    let partition = derive_partition(&state);
    let key = LakePaths::staging_object(&partition, &Uuid::new_v4().to_string(), "json");
    let bytes = serde_json::to_vec(&record)
        .map_err(|e| ApiError::internal(format!("failed to serialize record: {e}")))?;

    state
        .storage
        .put(&key, Bytes::from(bytes), WritePrecondition::None)
        .await
        .map_err(|e| ApiError::internal(format!("failed to stage record: {e}")))?;

    tracing::info!(key = %key, partition = %partition, "record staged");
    Ok(Json(IngestResponse {
        key,
        partition,
        record_count: 1,
    }))
}

/// POST `/batch` — validates and stages a JSON array as one batch object.
async fn post_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<IngestResponse>> {
    let schema = load_schema(&state).await?;

    let serde_json::Value::Array(items) = body else {
        return Err(ApiError::bad_request("batch body must be a JSON array"));
    };
    if items.is_empty() {
        return Err(ApiError::bad_request("batch must not be empty"));
    }

    let mut records = Vec::with_capacity(items.len());
    let mut violations = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        match as_record(item) {
            Ok(record) => {
                if let Err(errs) = validate_record(&schema, &record) {
                    violations.extend(errs.into_iter().map(|e| format!("record {i}: {e}")));
                }
                records.push(record);
            }
            Err(_) => violations.push(format!("record {i}: not a JSON object")),
        }
    }
    if !violations.is_empty() {
        return Err(ApiError::validation("batch rejected by schema", violations));
    }

    let partition = derive_partition(&state);
    let key = LakePaths::staging_object(&partition, &Uuid::new_v4().to_string(), "ndjson");

    let mut body = String::new();
    for record in &records {
        let line = serde_json::to_string(record)
            .map_err(|e| ApiError::internal(format!("failed to serialize record: {e}")))?;
        body.push_str(&line);
        body.push('\n');
    }

    state
        .storage
        .put(&key, Bytes::from(body), WritePrecondition::None)
        .await
        .map_err(|e| ApiError::internal(format!("failed to stage batch: {e}")))?;

    tracing::info!(key = %key, partition = %partition, records = records.len(), "batch staged");
    Ok(Json(IngestResponse {
        key,
        partition,
        record_count: records.len(),
    }))
}

async fn load_schema(state: &AppState) -> ApiResult<Arc<SchemaDocument>> {
    state.schema.get().await.map_err(|err| match err {
        LakeError::SchemaUnavailable { message } => ApiError::schema_unavailable(message),
        other => ApiError::from(other),
    })
}

fn as_record(value: serde_json::Value) -> ApiResult<Record> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(ApiError::bad_request("record must be a JSON object")),
    }
}

fn derive_partition(state: &AppState) -> String {
    format!(
        "{}={}",
        state.config.partition_field,
        Utc::now().format("%Y-%m-%dT%H")
    )
}
