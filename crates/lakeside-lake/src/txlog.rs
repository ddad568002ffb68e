//! Append-only, monotonically versioned transaction log.
//!
//! Every state change to the lake's file set is recorded as an immutable
//! entry at `_log/{version:08}.json`. Versions form a dense total order
//! starting at 0: entry V existing implies entries 0..V-1 exist.
//!
//! Version assignment is advisory-read-then-CAS: `next_version` lists the
//! log and computes max+1, and `append` writes with a does-not-exist
//! precondition. The coordinator serializes the only writer, so the CAS
//! retry loop almost never triggers; it exists as a safety net against
//! coordinator bypass, not as the primary exclusion mechanism.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lakeside_core::{LakePaths, StorageBackend, WritePrecondition, WriteResult};

use crate::error::{LakeError, Result};

/// Maximum CAS attempts before an append surfaces `LogContention`.
const MAX_APPEND_ATTEMPTS: u32 = 5;

/// Kind of state change an entry records.
///
/// `SchemaChange` and `Cleanup` are reserved: readers tolerate them and the
/// liveness fold ignores them; the compactor never writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOperation {
    /// A compaction: staging objects folded into a columnar artifact.
    Compact,
    /// Reserved for future schema transitions.
    SchemaChange,
    /// Reserved for future cleanup records.
    Cleanup,
}

/// A file-set change embedded in a log entry.
///
/// `add` actions describe artifacts becoming visible and carry size, row
/// count and partition; `remove` actions carry only the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAction {
    /// The key this action refers to.
    pub path: String,
    /// Byte size of an added artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Row count of an added artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    /// Partition of an added artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
}

impl FileAction {
    /// Describes an artifact becoming visible.
    #[must_use]
    pub fn add(path: impl Into<String>, size: u64, row_count: u64, partition: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: Some(size),
            row_count: Some(row_count),
            partition: Some(partition.into()),
        }
    }

    /// Describes a key that should no longer be considered live.
    #[must_use]
    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: None,
            row_count: None,
            partition: None,
        }
    }
}

/// An immutable, committed log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEntry {
    /// Dense version, assigned at commit.
    pub version: u64,
    /// Commit timestamp, millisecond precision.
    #[serde(with = "timestamp_millis")]
    pub timestamp: DateTime<Utc>,
    /// Kind of state change.
    pub operation: LogOperation,
    /// Artifacts becoming visible.
    pub add: Vec<FileAction>,
    /// Keys no longer live.
    pub remove: Vec<FileAction>,
    /// Free-form entry metadata (`partitionCount`, `totalRows`, ...).
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// An entry awaiting version assignment.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    /// Kind of state change.
    pub operation: LogOperation,
    /// Artifacts becoming visible.
    pub add: Vec<FileAction>,
    /// Keys no longer live.
    pub remove: Vec<FileAction>,
    /// Free-form entry metadata.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl TransactionDraft {
    /// Creates a compaction draft.
    #[must_use]
    pub fn compact(
        add: Vec<FileAction>,
        remove: Vec<FileAction>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            operation: LogOperation::Compact,
            add,
            remove,
            metadata,
        }
    }
}

/// Result of reading the full log.
#[derive(Debug, Clone)]
pub struct LogReadResult {
    /// All parseable entries, sorted by version ascending.
    pub entries: Vec<TransactionEntry>,
    /// Versions missing from the dense range `0..=max`. Operator-visible
    /// but never fatal to the reader.
    pub missing_versions: Vec<u64>,
}

/// The lake's logical file state, derived by folding the log.
#[derive(Debug, Clone, Default)]
pub struct Replay {
    /// Artifact keys currently considered live.
    pub live_artifacts: BTreeSet<String>,
    /// Staging keys that committed entries claim to have removed.
    pub removed_staging: BTreeSet<String>,
}

/// The append-only transaction log.
#[derive(Clone)]
pub struct TransactionLog {
    storage: Arc<dyn StorageBackend>,
}

impl TransactionLog {
    /// Creates a log over the given storage backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Computes the next version from a listing of the log prefix.
    ///
    /// This is an advisory read: exclusivity comes from the CAS in
    /// [`append`](Self::append), never from this value.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    pub async fn next_version(&self) -> Result<u64> {
        let metas = self.storage.list(LakePaths::LOG_PREFIX).await?;
        Ok(metas
            .iter()
            .filter_map(|m| LakePaths::log_version_of(&m.path))
            .max()
            .map_or(0, |max| max + 1))
    }

    /// Appends an entry, assigning it the next version.
    ///
    /// The write carries a does-not-exist precondition; on a lost race the
    /// version is recomputed and the write retried, a bounded number of
    /// times.
    ///
    /// # Errors
    ///
    /// Returns `LakeError::LogContention` if the CAS race is lost beyond
    /// the retry budget, or a storage/serialization error.
    pub async fn append(&self, draft: TransactionDraft) -> Result<u64> {
        for attempt in 0..MAX_APPEND_ATTEMPTS {
            let version = self.next_version().await?;
            let entry = TransactionEntry {
                version,
                timestamp: Utc::now(),
                operation: draft.operation,
                add: draft.add.clone(),
                remove: draft.remove.clone(),
                metadata: draft.metadata.clone(),
            };

            let json = serde_json::to_vec(&entry)
                .map_err(|e| LakeError::serialization(format!("failed to serialize entry: {e}")))?;

            let result = self
                .storage
                .put(
                    &LakePaths::log_entry(version),
                    Bytes::from(json),
                    WritePrecondition::DoesNotExist,
                )
                .await?;

            match result {
                WriteResult::Success { .. } => {
                    tracing::info!(
                        version,
                        adds = entry.add.len(),
                        removes = entry.remove.len(),
                        "transaction committed"
                    );
                    return Ok(version);
                }
                WriteResult::PreconditionFailed { .. } => {
                    tracing::warn!(version, attempt, "log version taken, recomputing");
                }
            }
        }

        Err(LakeError::LogContention {
            message: format!("lost the version race {MAX_APPEND_ATTEMPTS} times"),
        })
    }

    /// Reads all entries, sorted by version, reporting gaps.
    ///
    /// Gaps in the version numbering are returned in `missing_versions`;
    /// they never prevent replay of the entries that do exist.
    ///
    /// # Errors
    ///
    /// Returns an error if listing, fetching or parsing fails.
    pub async fn read_all(&self) -> Result<LogReadResult> {
        let metas = self.storage.list(LakePaths::LOG_PREFIX).await?;
        let mut versions: Vec<u64> = metas
            .iter()
            .filter_map(|m| LakePaths::log_version_of(&m.path))
            .collect();
        versions.sort_unstable();
        versions.dedup();

        let mut entries = Vec::with_capacity(versions.len());
        for version in &versions {
            let key = LakePaths::log_entry(*version);
            let bytes = self.storage.get(&key).await?;
            let entry: TransactionEntry = serde_json::from_slice(&bytes)
                .map_err(|e| LakeError::serialization(format!("failed to parse '{key}': {e}")))?;
            entries.push(entry);
        }

        let missing_versions = match versions.last() {
            Some(&max) => {
                let present: BTreeSet<u64> = versions.iter().copied().collect();
                (0..=max).filter(|v| !present.contains(v)).collect()
            }
            None => Vec::new(),
        };

        if !missing_versions.is_empty() {
            tracing::warn!(missing = ?missing_versions, "transaction log has version gaps");
        }

        Ok(LogReadResult {
            entries,
            missing_versions,
        })
    }

    /// Folds all entries in version order into the lake's logical state.
    ///
    /// An `add` makes a path live again even if a previous entry removed
    /// it. Reserved operations contribute nothing to liveness.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the log fails.
    pub async fn replay(&self) -> Result<Replay> {
        let read = self.read_all().await?;
        let mut replay = Replay::default();

        for entry in &read.entries {
            if entry.operation != LogOperation::Compact {
                continue;
            }
            for action in &entry.add {
                replay.live_artifacts.insert(action.path.clone());
            }
            for action in &entry.remove {
                replay.live_artifacts.remove(&action.path);
                replay.removed_staging.insert(action.path.clone());
            }
        }

        Ok(replay)
    }
}

/// Millisecond-precision UTC timestamps (`2025-11-23T19:30:45.000Z`).
///
/// Serialization is pinned to exactly three fractional digits so entry
/// bytes are stable across writers; deserialization accepts any RFC 3339
/// precision.
mod timestamp_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
