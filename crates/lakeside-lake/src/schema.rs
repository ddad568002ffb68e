//! Schema document, record validation and the per-process schema cache.
//!
//! The schema is a single JSON document owned by the schema manager; the
//! core only ever reads it. Its shape is a flat field list:
//!
//! ```json
//! {"fields": [
//!   {"name": "order_id", "type": "BYTE_ARRAY", "logical_type": "UTF8"},
//!   {"name": "amount", "type": "INT64", "repetition_type": "OPTIONAL"}
//! ]}
//! ```
//!
//! Record validation dispatches on `(declared type, actual JSON kind)`:
//! records are parsed JSON objects, and each schema field constrains the
//! kind of value permitted under its name.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use lakeside_core::{LakePaths, StorageBackend};

use crate::error::{LakeError, Result};

/// Default time-to-live for the cached schema document.
pub const DEFAULT_SCHEMA_TTL: Duration = Duration::from_secs(60);

/// The schema document: a flat list of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDocument {
    /// Declared fields, in column order.
    pub fields: Vec<SchemaField>,
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Column name.
    pub name: String,
    /// Physical parquet type.
    #[serde(rename = "type")]
    pub primitive_type: PrimitiveType,
    /// Optional logical annotation refining the physical type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_type: Option<LogicalType>,
    /// Repetition; absent means required.
    #[serde(default)]
    pub repetition_type: Repetition,
}

/// Physical parquet types accepted in the schema document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimitiveType {
    /// Boolean values.
    Boolean,
    /// 32-bit signed integers.
    Int32,
    /// 64-bit signed integers.
    Int64,
    /// Legacy 96-bit integers.
    Int96,
    /// 64-bit floats.
    Double,
    /// Variable-length byte strings.
    ByteArray,
    /// Alias for variable-length byte strings.
    Binary,
    /// Fixed-length byte strings.
    FixedLenByteArray,
}

/// Logical annotations accepted in the schema document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalType {
    /// UTF-8 string.
    Utf8,
    /// JSON-encoded string.
    Json,
    /// Days since the epoch.
    Date,
    /// Milliseconds since the epoch.
    TimestampMillis,
    /// Microseconds since the epoch.
    TimestampMicros,
}

/// Field repetition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Repetition {
    /// Exactly one value per record.
    #[default]
    Required,
    /// Zero or one value per record.
    Optional,
    /// A list of values per record.
    Repeated,
}

/// A parsed record: a JSON object keyed by field name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Validates a record against the schema.
///
/// Returns the full list of violations rather than stopping at the first,
/// so callers can report every problem in one response.
///
/// # Errors
///
/// Returns one message per violated field.
pub fn validate_record(
    schema: &SchemaDocument,
    record: &Record,
) -> std::result::Result<(), Vec<String>> {
    let mut violations = Vec::new();

    for field in &schema.fields {
        match record.get(&field.name) {
            None | Some(serde_json::Value::Null) => {
                if field.repetition_type == Repetition::Required {
                    violations.push(format!("field '{}' is required", field.name));
                }
            }
            Some(value) => {
                if field.repetition_type == Repetition::Repeated {
                    match value.as_array() {
                        Some(items) => {
                            for (i, item) in items.iter().enumerate() {
                                if !scalar_matches(field.primitive_type, item) {
                                    violations.push(format!(
                                        "field '{}' element {i} is not {}",
                                        field.name,
                                        expected_kind(field.primitive_type)
                                    ));
                                }
                            }
                        }
                        None => violations
                            .push(format!("field '{}' must be an array", field.name)),
                    }
                } else if !scalar_matches(field.primitive_type, value) {
                    violations.push(format!(
                        "field '{}' is not {}",
                        field.name,
                        expected_kind(field.primitive_type)
                    ));
                }
            }
        }
    }

    for name in record.keys() {
        if !schema.fields.iter().any(|f| &f.name == name) {
            violations.push(format!("unknown field '{name}'"));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn scalar_matches(primitive: PrimitiveType, value: &serde_json::Value) -> bool {
    match primitive {
        PrimitiveType::Boolean => value.is_boolean(),
        PrimitiveType::Int32 => value
            .as_i64()
            .is_some_and(|n| i32::try_from(n).is_ok()),
        PrimitiveType::Int64 | PrimitiveType::Int96 => value.as_i64().is_some(),
        PrimitiveType::Double => value.is_number(),
        PrimitiveType::ByteArray | PrimitiveType::Binary | PrimitiveType::FixedLenByteArray => {
            value.is_string()
        }
    }
}

fn expected_kind(primitive: PrimitiveType) -> &'static str {
    match primitive {
        PrimitiveType::Boolean => "a boolean",
        PrimitiveType::Int32 => "a 32-bit integer",
        PrimitiveType::Int64 | PrimitiveType::Int96 => "an integer",
        PrimitiveType::Double => "a number",
        PrimitiveType::ByteArray | PrimitiveType::Binary | PrimitiveType::FixedLenByteArray => {
            "a string"
        }
    }
}

struct CachedSchema {
    etag: String,
    schema: Arc<SchemaDocument>,
    loaded_at: Instant,
}

/// Per-process schema cache with TTL and etag revalidation.
///
/// Holds `{etag, value, loadedAt}` behind a read-write lock. On expiry a
/// conditional re-read (`head` + etag compare) avoids refetching an
/// unchanged document. There is no cross-process consistency requirement.
pub struct SchemaCache {
    storage: Arc<dyn StorageBackend>,
    ttl: Duration,
    cached: RwLock<Option<CachedSchema>>,
}

impl SchemaCache {
    /// Creates a cache with the default TTL.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self::with_ttl(storage, DEFAULT_SCHEMA_TTL)
    }

    /// Creates a cache with an explicit TTL.
    #[must_use]
    pub fn with_ttl(storage: Arc<dyn StorageBackend>, ttl: Duration) -> Self {
        Self {
            storage,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Returns the schema, from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns `LakeError::SchemaUnavailable` when the document is missing
    /// or malformed, or a storage error for other failures.
    pub async fn get(&self) -> Result<Arc<SchemaDocument>> {
        if let Some(schema) = self.fresh() {
            return Ok(schema);
        }

        let meta = self.storage.head(LakePaths::SCHEMA).await?;
        let Some(meta) = meta else {
            return Err(LakeError::SchemaUnavailable {
                message: "schema document not found".to_string(),
            });
        };

        // Unchanged document: revalidate the cached value without a fetch.
        if let Some(schema) = self.revalidate(&meta.etag) {
            return Ok(schema);
        }

        let bytes = match self.storage.get(LakePaths::SCHEMA).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => {
                return Err(LakeError::SchemaUnavailable {
                    message: "schema document not found".to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let schema: SchemaDocument = serde_json::from_slice(&bytes).map_err(|e| {
            LakeError::SchemaUnavailable {
                message: format!("schema document is malformed: {e}"),
            }
        })?;
        if schema.fields.is_empty() {
            return Err(LakeError::SchemaUnavailable {
                message: "schema document declares no fields".to_string(),
            });
        }

        let schema = Arc::new(schema);
        if let Ok(mut cached) = self.cached.write() {
            *cached = Some(CachedSchema {
                etag: meta.etag,
                schema: Arc::clone(&schema),
                loaded_at: Instant::now(),
            });
        }
        Ok(schema)
    }

    fn fresh(&self) -> Option<Arc<SchemaDocument>> {
        let cached = self.cached.read().ok()?;
        cached
            .as_ref()
            .filter(|c| c.loaded_at.elapsed() < self.ttl)
            .map(|c| Arc::clone(&c.schema))
    }

    fn revalidate(&self, etag: &str) -> Option<Arc<SchemaDocument>> {
        let mut cached = self.cached.write().ok()?;
        let entry = cached.as_mut().filter(|c| c.etag == etag)?;
        entry.loaded_at = Instant::now();
        Some(Arc::clone(&entry.schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use lakeside_core::{MemoryBackend, WritePrecondition};
    use serde_json::json;

    fn sample_schema() -> SchemaDocument {
        SchemaDocument {
            fields: vec![
                SchemaField {
                    name: "order_id".to_string(),
                    primitive_type: PrimitiveType::ByteArray,
                    logical_type: Some(LogicalType::Utf8),
                    repetition_type: Repetition::Required,
                },
                SchemaField {
                    name: "amount".to_string(),
                    primitive_type: PrimitiveType::Int64,
                    logical_type: None,
                    repetition_type: Repetition::Optional,
                },
                SchemaField {
                    name: "tags".to_string(),
                    primitive_type: PrimitiveType::ByteArray,
                    logical_type: Some(LogicalType::Utf8),
                    repetition_type: Repetition::Repeated,
                },
            ],
        }
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().expect("test record is an object").clone()
    }

    #[test]
    fn document_parses_screaming_snake_wire_form() {
        let doc: SchemaDocument = serde_json::from_value(json!({
            "fields": [
                {"name": "order_id", "type": "BYTE_ARRAY", "logical_type": "UTF8"},
                {"name": "qty", "type": "INT32", "repetition_type": "OPTIONAL"},
                {"name": "ts", "type": "INT64", "logical_type": "TIMESTAMP_MILLIS"}
            ]
        }))
        .expect("parse");

        assert_eq!(doc.fields.len(), 3);
        assert_eq!(doc.fields[0].primitive_type, PrimitiveType::ByteArray);
        assert_eq!(doc.fields[0].logical_type, Some(LogicalType::Utf8));
        assert_eq!(doc.fields[0].repetition_type, Repetition::Required);
        assert_eq!(doc.fields[1].repetition_type, Repetition::Optional);
        assert_eq!(doc.fields[2].logical_type, Some(LogicalType::TimestampMillis));
    }

    #[test]
    fn valid_record_passes() {
        let schema = sample_schema();
        let rec = record(json!({"order_id": "o-1", "amount": 42, "tags": ["a", "b"]}));
        assert!(validate_record(&schema, &rec).is_ok());
    }

    #[test]
    fn optional_field_may_be_absent_or_null() {
        let schema = sample_schema();
        assert!(validate_record(&schema, &record(json!({"order_id": "o-1"}))).is_ok());
        assert!(
            validate_record(&schema, &record(json!({"order_id": "o-1", "amount": null}))).is_ok()
        );
    }

    #[test]
    fn missing_required_field_is_a_violation() {
        let schema = sample_schema();
        let err = validate_record(&schema, &record(json!({"amount": 1}))).unwrap_err();
        assert!(err.iter().any(|v| v.contains("'order_id' is required")));
    }

    #[test]
    fn kind_mismatches_are_violations() {
        let schema = sample_schema();
        let err = validate_record(
            &schema,
            &record(json!({"order_id": 7, "amount": "not a number"})),
        )
        .unwrap_err();
        assert_eq!(err.len(), 2);
    }

    #[test]
    fn int32_is_range_checked() {
        let schema = SchemaDocument {
            fields: vec![SchemaField {
                name: "qty".to_string(),
                primitive_type: PrimitiveType::Int32,
                logical_type: None,
                repetition_type: Repetition::Required,
            }],
        };
        assert!(validate_record(&schema, &record(json!({"qty": 2_147_483_647i64}))).is_ok());
        assert!(validate_record(&schema, &record(json!({"qty": 2_147_483_648i64}))).is_err());
    }

    #[test]
    fn repeated_field_must_be_an_array_of_matching_scalars() {
        let schema = sample_schema();
        let base = json!({"order_id": "o-1"});

        let mut rec = record(base.clone());
        rec.insert("tags".to_string(), json!("not-an-array"));
        assert!(validate_record(&schema, &rec).is_err());

        let mut rec = record(base);
        rec.insert("tags".to_string(), json!(["ok", 3]));
        let err = validate_record(&schema, &rec).unwrap_err();
        assert!(err.iter().any(|v| v.contains("element 1")));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let schema = sample_schema();
        let err =
            validate_record(&schema, &record(json!({"order_id": "o-1", "extra": 1}))).unwrap_err();
        assert!(err.iter().any(|v| v.contains("unknown field 'extra'")));
    }

    async fn put_schema(backend: &MemoryBackend, doc: &serde_json::Value) {
        backend
            .put(
                LakePaths::SCHEMA,
                Bytes::from(serde_json::to_vec(doc).expect("serialize")),
                WritePrecondition::None,
            )
            .await
            .expect("put schema");
    }

    #[tokio::test]
    async fn cache_returns_parsed_document() {
        let backend = Arc::new(MemoryBackend::new());
        put_schema(
            &backend,
            &json!({"fields": [{"name": "a", "type": "INT64"}]}),
        )
        .await;

        let cache = SchemaCache::new(backend);
        let schema = cache.get().await.expect("get");
        assert_eq!(schema.fields.len(), 1);
    }

    #[tokio::test]
    async fn missing_schema_is_unavailable() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = SchemaCache::new(backend);
        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, LakeError::SchemaUnavailable { .. }));
    }

    #[tokio::test]
    async fn malformed_schema_is_unavailable() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .put(
                LakePaths::SCHEMA,
                Bytes::from("{not json"),
                WritePrecondition::None,
            )
            .await
            .expect("put");

        let cache = SchemaCache::new(backend);
        assert!(matches!(
            cache.get().await.unwrap_err(),
            LakeError::SchemaUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn empty_field_list_is_unavailable() {
        let backend = Arc::new(MemoryBackend::new());
        put_schema(&backend, &json!({"fields": []})).await;

        let cache = SchemaCache::new(backend);
        assert!(matches!(
            cache.get().await.unwrap_err(),
            LakeError::SchemaUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn fresh_cache_serves_the_old_document() {
        let backend = Arc::new(MemoryBackend::new());
        put_schema(
            &backend,
            &json!({"fields": [{"name": "a", "type": "INT64"}]}),
        )
        .await;

        let cache = SchemaCache::with_ttl(backend.clone(), Duration::from_secs(3600));
        assert_eq!(cache.get().await.expect("get").fields[0].name, "a");

        put_schema(
            &backend,
            &json!({"fields": [{"name": "b", "type": "INT64"}]}),
        )
        .await;

        // TTL has not expired: the stale value is intentionally served.
        assert_eq!(cache.get().await.expect("get").fields[0].name, "a");
    }

    #[tokio::test]
    async fn expired_cache_picks_up_the_new_document() {
        let backend = Arc::new(MemoryBackend::new());
        put_schema(
            &backend,
            &json!({"fields": [{"name": "a", "type": "INT64"}]}),
        )
        .await;

        let cache = SchemaCache::with_ttl(backend.clone(), Duration::ZERO);
        assert_eq!(cache.get().await.expect("get").fields[0].name, "a");

        put_schema(
            &backend,
            &json!({"fields": [{"name": "b", "type": "INT64"}]}),
        )
        .await;
        assert_eq!(cache.get().await.expect("get").fields[0].name, "b");
    }
}
