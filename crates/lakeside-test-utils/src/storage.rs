//! Test storage with operation tracing and failure injection.
//!
//! Failure injection is per operation kind, not per path alone: exercising a
//! deferred reclaim requires the *delete* of a staging key to fail while the
//! pre-commit *read* of the same key succeeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use lakeside_core::error::{Error, Result};
use lakeside_core::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Path that was read.
        path: String,
    },
    /// Head operation (metadata only).
    Head {
        /// Path that was checked.
        path: String,
    },
    /// Put operation.
    Put {
        /// Path that was written.
        path: String,
        /// Size of data written.
        size: usize,
        /// Precondition used.
        precondition: WritePrecondition,
    },
    /// Delete operation.
    Delete {
        /// Path that was deleted.
        path: String,
    },
    /// List operation.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
}

#[derive(Debug, Default)]
struct Injections {
    fail_gets: Vec<String>,
    fail_puts: Vec<String>,
    fail_deletes: Vec<String>,
    fail_lists: Vec<String>,
    // CAS puts to these prefixes always report a lost race.
    contend_cas_puts: Vec<String>,
}

/// In-memory storage backend with operation tracing.
///
/// Records all operations for later assertion, and can be told to fail
/// specific operation kinds for matching path prefixes.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    data: Arc<Mutex<HashMap<String, StoredObject>>>,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    injections: Arc<Mutex<Injections>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: i64,
    last_modified: DateTime<Utc>,
}

impl TracingMemoryBackend {
    /// Creates a new empty tracing backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Counts recorded gets for a path prefix.
    #[must_use]
    pub fn get_count(&self, prefix: &str) -> usize {
        self.operations()
            .iter()
            .filter(|op| matches!(op, StorageOp::Get { path } if path.starts_with(prefix)))
            .count()
    }

    /// Makes gets fail for the given path prefix.
    pub fn fail_gets(&self, prefix: impl Into<String>) {
        self.injections.lock().expect("lock").fail_gets.push(prefix.into());
    }

    /// Makes puts fail for the given path prefix.
    pub fn fail_puts(&self, prefix: impl Into<String>) {
        self.injections.lock().expect("lock").fail_puts.push(prefix.into());
    }

    /// Makes deletes fail for the given path prefix.
    pub fn fail_deletes(&self, prefix: impl Into<String>) {
        self.injections
            .lock()
            .expect("lock")
            .fail_deletes
            .push(prefix.into());
    }

    /// Makes lists fail for the given prefix.
    pub fn fail_lists(&self, prefix: impl Into<String>) {
        self.injections.lock().expect("lock").fail_lists.push(prefix.into());
    }

    /// Makes every does-not-exist put to the given prefix report a lost
    /// CAS race, as if a bypassing writer always got there first.
    pub fn contend_cas_puts(&self, prefix: impl Into<String>) {
        self.injections
            .lock()
            .expect("lock")
            .contend_cas_puts
            .push(prefix.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        *self.injections.lock().expect("lock") = Injections::default();
    }

    /// Returns all stored paths, sorted (for debugging).
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.data.lock().expect("lock").keys().cloned().collect();
        paths.sort();
        paths
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check(&self, kind: fn(&Injections) -> &Vec<String>, path: &str) -> Result<()> {
        let injections = self.injections.lock().expect("lock");
        if kind(&injections).iter().any(|p| path.starts_with(p)) {
            return Err(Error::Internal {
                message: format!("injected failure for path: {path}"),
            });
        }
        Ok(())
    }

    fn cas_contended(&self, path: &str) -> bool {
        self.injections
            .lock()
            .expect("lock")
            .contend_cas_puts
            .iter()
            .any(|p| path.starts_with(p))
    }
}

#[async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.check(|i| &i.fail_gets, path)?;
        self.record(StorageOp::Get {
            path: path.to_string(),
        });

        let data = self.data.lock().expect("lock");
        data.get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.check(|i| &i.fail_puts, path)?;
        self.record(StorageOp::Put {
            path: path.to_string(),
            size: data.len(),
            precondition: precondition.clone(),
        });

        let mut store = self.data.lock().expect("lock");
        let existing = store.get(path);

        match &precondition {
            WritePrecondition::None => {}
            WritePrecondition::DoesNotExist => {
                if self.cas_contended(path) {
                    return Ok(WriteResult::PreconditionFailed {
                        current_etag: "contended".to_string(),
                    });
                }
                if let Some(obj) = existing {
                    return Ok(WriteResult::PreconditionFailed {
                        current_etag: obj.etag.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesEtag(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match existing {
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
        }

        let new_etag = existing.map_or(1, |o| o.etag + 1);
        store.insert(
            path.to_string(),
            StoredObject {
                data,
                etag: new_etag,
                last_modified: Utc::now(),
            },
        );

        Ok(WriteResult::Success {
            etag: new_etag.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check(|i| &i.fail_deletes, path)?;
        self.record(StorageOp::Delete {
            path: path.to_string(),
        });

        self.data.lock().expect("lock").remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.check(|i| &i.fail_lists, prefix)?;
        self.record(StorageOp::List {
            prefix: prefix.to_string(),
        });

        let data = self.data.lock().expect("lock");
        Ok(data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectMeta {
                path: k.clone(),
                size: v.data.len() as u64,
                etag: v.etag.to_string(),
                last_modified: Some(v.last_modified),
            })
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.record(StorageOp::Head {
            path: path.to_string(),
        });

        let data = self.data.lock().expect("lock");
        Ok(data.get(path).map(|o| ObjectMeta {
            path: path.to_string(),
            size: o.data.len() as u64,
            etag: o.etag.to_string(),
            last_modified: Some(o.last_modified),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_operations() {
        let storage = TracingMemoryBackend::new();

        storage
            .put("a.json", Bytes::from("x"), WritePrecondition::None)
            .await
            .expect("put");
        let _ = storage.get("a.json").await;
        let _ = storage.list("").await;

        let ops = storage.operations();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], StorageOp::Put { .. }));
        assert!(matches!(ops[1], StorageOp::Get { .. }));
        assert!(matches!(ops[2], StorageOp::List { .. }));
    }

    #[tokio::test]
    async fn delete_failure_injection_leaves_reads_working() {
        let storage = TracingMemoryBackend::new();
        storage
            .put("data/p=A/x.json", Bytes::from("{}"), WritePrecondition::None)
            .await
            .expect("put");

        storage.fail_deletes("data/p=A/");

        assert!(storage.get("data/p=A/x.json").await.is_ok());
        assert!(storage.delete("data/p=A/x.json").await.is_err());

        storage.clear_failures();
        assert!(storage.delete("data/p=A/x.json").await.is_ok());
    }

    #[tokio::test]
    async fn cas_contention_injection_always_loses_the_race() {
        let storage = TracingMemoryBackend::new();
        storage.contend_cas_puts("_log/");

        let result = storage
            .put(
                "_log/00000000.json",
                Bytes::from("{}"),
                WritePrecondition::DoesNotExist,
            )
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::PreconditionFailed { .. }));

        // Unconditional writes elsewhere are unaffected.
        let result = storage
            .put("data/p=A/x.json", Bytes::from("{}"), WritePrecondition::None)
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::Success { .. }));
    }
}
