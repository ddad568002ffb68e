//! Canonical fixtures: schema documents and staging writers.

use bytes::Bytes;
use serde_json::{Value, json};

use lakeside_core::error::Result;
use lakeside_core::paths::LakePaths;
use lakeside_core::storage::{StorageBackend, WritePrecondition};

/// The canonical order-events schema used across the test suites.
#[must_use]
pub fn order_schema() -> Value {
    json!({
        "fields": [
            {"name": "order_id", "type": "BYTE_ARRAY", "logical_type": "UTF8"},
            {"name": "qty", "type": "INT64"},
            {"name": "note", "type": "BYTE_ARRAY", "logical_type": "UTF8", "repetition_type": "OPTIONAL"}
        ]
    })
}

/// Writes a schema document to its canonical key.
///
/// # Errors
///
/// Returns an error if the write fails.
pub async fn write_schema(storage: &dyn StorageBackend, schema: &Value) -> Result<()> {
    storage
        .put(
            LakePaths::SCHEMA,
            Bytes::from(serde_json::to_vec(schema).expect("fixture schema serializes")),
            WritePrecondition::None,
        )
        .await?;
    Ok(())
}

/// Stages a single-record object and returns its key.
///
/// # Errors
///
/// Returns an error if the write fails.
pub async fn stage_record(
    storage: &dyn StorageBackend,
    partition: &str,
    id: &str,
    record: &Value,
) -> Result<String> {
    let key = LakePaths::staging_object(partition, id, "json");
    storage
        .put(
            &key,
            Bytes::from(serde_json::to_vec(record).expect("fixture record serializes")),
            WritePrecondition::None,
        )
        .await?;
    Ok(key)
}

/// Stages a newline-delimited batch object and returns its key.
///
/// # Errors
///
/// Returns an error if the write fails.
pub async fn stage_batch(
    storage: &dyn StorageBackend,
    partition: &str,
    id: &str,
    records: &[Value],
) -> Result<String> {
    let key = LakePaths::staging_object(partition, id, "ndjson");
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record).expect("fixture record serializes"));
        body.push('\n');
    }
    storage
        .put(&key, Bytes::from(body), WritePrecondition::None)
        .await?;
    Ok(key)
}
