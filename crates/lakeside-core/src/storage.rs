//! Object-store abstraction used by every Lakeside component.
//!
//! The contract matches cloud object storage semantics:
//! - Whole-object reads and writes only (no ranged access is needed here)
//! - Conditional writes with preconditions (the CAS primitive the
//!   transaction log and coordinator are built on)
//! - Idempotent deletes
//! - Prefix listing with no ordering guarantee
//!
//! The etag token is an opaque `String` so that GCS generations, S3 ETags
//! and Azure ETags can all back it without leaking provider assumptions
//! into the lake layer.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// Write only if the key does not exist.
    DoesNotExist,
    /// Write only if the object's etag matches the given token.
    MatchesEtag(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
///
/// Precondition failure is a normal result, never an `Err` — callers decide
/// whether a lost race is an error in their domain.
#[derive(Debug, Clone)]
pub enum WriteResult {
    /// Write succeeded, returns the new etag token.
    Success {
        /// The etag of the object after the write.
        etag: String,
    },
    /// Precondition failed, returns the current etag token.
    PreconditionFailed {
        /// The etag that caused the precondition to fail.
        current_etag: String,
    },
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object key.
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Opaque etag token for CAS and cache validation.
    pub etag: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait for object storage.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads an entire object.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes with an optional precondition.
    ///
    /// Returns `WriteResult::PreconditionFailed` if the precondition is not
    /// met; never returns `Err` for a precondition failure.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes an object. Succeeds even if the object doesn't exist.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix.
    ///
    /// Ordering is arbitrary and may vary between backends and invocations;
    /// callers requiring deterministic order must sort the results.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if the object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;
}

/// In-memory storage backend for tests and local development.
///
/// Thread-safe via `RwLock`. Uses numeric etags internally (exposed as
/// strings) to simulate generation-style CAS behavior.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: i64,
    last_modified: DateTime<Utc>,
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn meta_of(path: &str, obj: &StoredObject) -> ObjectMeta {
    ObjectMeta {
        path: path.to_string(),
        size: obj.data.len() as u64,
        etag: obj.etag.to_string(),
        last_modified: Some(obj.last_modified),
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.objects.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let current = objects.get(path);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(obj) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_etag: obj.etag.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesEtag(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match current {
                    Some(obj) if obj.etag != expected_num => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_etag: obj.etag.to_string(),
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_etag: "0".to_string(),
                        });
                    }
                    _ => {}
                }
            }
            WritePrecondition::None => {}
        }

        let new_etag = current.map_or(1, |o| o.etag + 1);
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                etag: new_etag,
                last_modified: Utc::now(),
            },
        );
        drop(objects);

        Ok(WriteResult::Success {
            etag: new_etag.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| Error::Internal {
                message: "lock poisoned".into(),
            })?
            .remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| meta_of(path, obj))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        Ok(objects.get(path).map(|obj| meta_of(path, obj)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip() {
        let backend = MemoryBackend::new();
        let data = Bytes::from("hello world");

        let result = backend
            .put("test/file.json", data.clone(), WritePrecondition::None)
            .await
            .expect("put should succeed");
        assert!(matches!(result, WriteResult::Success { ref etag } if etag == "1"));

        let retrieved = backend.get("test/file.json").await.expect("get");
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.get("nope.json").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn precondition_does_not_exist() {
        let backend = MemoryBackend::new();

        let result = backend
            .put("new.json", Bytes::from("a"), WritePrecondition::DoesNotExist)
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::Success { .. }));

        // Second conditional create loses.
        let result = backend
            .put("new.json", Bytes::from("b"), WritePrecondition::DoesNotExist)
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::PreconditionFailed { .. }));

        // The first write's content survives.
        assert_eq!(backend.get("new.json").await.expect("get"), Bytes::from("a"));
    }

    #[tokio::test]
    async fn precondition_matches_etag() {
        let backend = MemoryBackend::new();

        let WriteResult::Success { etag } = backend
            .put("obj.json", Bytes::from("v1"), WritePrecondition::None)
            .await
            .expect("put")
        else {
            panic!("expected success");
        };

        let result = backend
            .put(
                "obj.json",
                Bytes::from("v2"),
                WritePrecondition::MatchesEtag(etag.clone()),
            )
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::Success { .. }));

        // Stale etag loses.
        let result = backend
            .put(
                "obj.json",
                Bytes::from("v3"),
                WritePrecondition::MatchesEtag(etag),
            )
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let backend = MemoryBackend::new();
        for key in ["data/p=A/1.json", "data/p=A/2.json", "parquet/p=A/x.parquet"] {
            backend
                .put(key, Bytes::from("x"), WritePrecondition::None)
                .await
                .expect("put");
        }

        assert_eq!(backend.list("data/").await.expect("list").len(), 2);
        assert_eq!(backend.list("parquet/").await.expect("list").len(), 1);
        assert_eq!(backend.list("_log/").await.expect("list").len(), 0);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend
            .put("del.json", Bytes::from("x"), WritePrecondition::None)
            .await
            .expect("put");

        backend.delete("del.json").await.expect("first delete");
        backend.delete("del.json").await.expect("second delete");
        assert!(backend.head("del.json").await.expect("head").is_none());
    }

    #[tokio::test]
    async fn head_reports_meta() {
        let backend = MemoryBackend::new();
        backend
            .put("meta.json", Bytes::from("1234"), WritePrecondition::None)
            .await
            .expect("put");

        let meta = backend
            .head("meta.json")
            .await
            .expect("head")
            .expect("exists");
        assert_eq!(meta.path, "meta.json");
        assert_eq!(meta.size, 4);
        assert!(!meta.etag.is_empty());
        assert!(meta.last_modified.is_some());
    }
}
