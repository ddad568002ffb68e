//! Compaction orchestrator: drives one compaction end to end.
//!
//! The sequence is fixed: schema fetch, snapshot, acquire, per-partition
//! encode, log commit, publish, reclaim, release. The log append is the
//! atomic linearization point — before it no reader sees the new
//! artifacts, after it all readers do. The log is intentionally committed
//! *before* artifact bytes are published: a brief referenced-but-missing
//! window is acceptable (the reconciler reports it), whereas an artifact
//! with no log entry would confuse replay. Consequently nothing after the
//! commit may surface as a failure; deferred publish and reclaim work is
//! logged and left to reconciliation.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::future::{join_all, try_join_all};
use serde::Serialize;

use lakeside_core::{LakePaths, RetryPolicy, StorageBackend, WritePrecondition, retry};

use crate::coordinator::{AcquireOutcome, CompactionCoordinator};
use crate::encoder::{ParquetEncoder, RecordEncoder};
use crate::error::{LakeError, Result};
use crate::partition::{PartitionGroup, group_by_partition};
use crate::schema::{Record, SchemaCache, SchemaDocument};
use crate::txlog::{FileAction, TransactionDraft, TransactionLog};

/// Result of one compaction run.
#[derive(Debug, Clone)]
pub enum CompactionOutcome {
    /// The staging area was empty (or held nothing compactable).
    NoFiles,
    /// A transaction was committed.
    Compacted(CompactionSummary),
}

/// Summary of a committed compaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionSummary {
    /// The committed transaction version — the compaction's identity.
    pub transaction_version: u64,
    /// Number of partitions encoded.
    pub partitions: usize,
    /// Number of staging objects folded in.
    pub files_compacted: usize,
    /// Total rows across all artifacts.
    pub total_rows: u64,
    /// Artifact keys, in partition order.
    pub parquet_files: Vec<String>,
}

/// One partition's encoded output, pending commit.
struct PartitionPlan {
    partition: String,
    artifact_path: String,
    bytes: Bytes,
    row_count: u64,
    source_keys: Vec<String>,
    artifact_size: u64,
}

/// The compaction orchestrator.
pub struct Compactor {
    storage: Arc<dyn StorageBackend>,
    log: TransactionLog,
    coordinator: Arc<CompactionCoordinator>,
    schema: Arc<SchemaCache>,
    encoder: Arc<dyn RecordEncoder>,
    retry_policy: RetryPolicy,
}

impl Compactor {
    /// Creates an orchestrator with the parquet encoder.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        coordinator: Arc<CompactionCoordinator>,
        schema: Arc<SchemaCache>,
    ) -> Self {
        Self::with_encoder(storage, coordinator, schema, Arc::new(ParquetEncoder::new()))
    }

    /// Creates an orchestrator with an explicit encoder.
    #[must_use]
    pub fn with_encoder(
        storage: Arc<dyn StorageBackend>,
        coordinator: Arc<CompactionCoordinator>,
        schema: Arc<SchemaCache>,
        encoder: Arc<dyn RecordEncoder>,
    ) -> Self {
        Self {
            log: TransactionLog::new(Arc::clone(&storage)),
            storage,
            coordinator,
            schema,
            encoder,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Returns the transaction log this orchestrator commits to.
    #[must_use]
    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    /// Runs one compaction.
    ///
    /// # Errors
    ///
    /// Pre-commit failures (`SchemaUnavailable`, `Busy`,
    /// `PartitionReadFailed`, `EncodeFailed`, `LogContention`) propagate and
    /// leave the log untouched. Post-commit failures never propagate.
    pub async fn run(&self) -> Result<CompactionOutcome> {
        // Step 1: schema, before any lock is taken.
        let schema = self.schema.get().await?;

        // Step 2: snapshot. This listing is the authoritative batch; staging
        // objects written after this point belong to the next run.
        let mut snapshot: Vec<String> = self
            .storage
            .list(LakePaths::STAGING_PREFIX)
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .collect();
        snapshot.sort_unstable();

        if snapshot.is_empty() {
            tracing::info!("staging area is empty, nothing to compact");
            return Ok(CompactionOutcome::NoFiles);
        }

        // Step 3: acquire. Every exit path below must release.
        match self.coordinator.try_acquire(snapshot.clone()).await? {
            AcquireOutcome::Acquired => {}
            AcquireOutcome::Busy { batch_size, age_ms } => {
                return Err(LakeError::Busy { batch_size, age_ms });
            }
        }

        let result = self.run_locked(&schema, &snapshot).await;

        if let Err(err) = self.coordinator.release().await {
            tracing::error!(error = %err, "failed to release compaction lock");
        }

        result
    }

    /// Steps 4-7, executed while holding the coordinator lock.
    async fn run_locked(
        &self,
        schema: &SchemaDocument,
        snapshot: &[String],
    ) -> Result<CompactionOutcome> {
        let groups = group_by_partition(snapshot);
        if groups.is_empty() {
            tracing::info!(
                listed = snapshot.len(),
                "no staging keys in the partition namespace"
            );
            return Ok(CompactionOutcome::NoFiles);
        }

        // One wall-clock timestamp for the whole run. Ties across partitions
        // are fine: the partition prefix disambiguates the artifact keys.
        let timestamp = LakePaths::path_safe_timestamp(Utc::now());

        // Step 4: per-partition encode, fanned out.
        let plans = try_join_all(
            groups
                .iter()
                .map(|group| self.encode_partition(schema, group, &timestamp)),
        )
        .await?;

        // Step 5: commit. The single linearization point.
        let mut add = Vec::with_capacity(plans.len());
        let mut remove = Vec::new();
        let mut total_rows = 0u64;
        for plan in &plans {
            add.push(FileAction::add(
                &plan.artifact_path,
                plan.artifact_size,
                plan.row_count,
                &plan.partition,
            ));
            remove.extend(plan.source_keys.iter().map(FileAction::remove));
            total_rows += plan.row_count;
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("partitionCount".to_string(), serde_json::json!(plans.len()));
        metadata.insert("totalRows".to_string(), serde_json::json!(total_rows));

        let files_compacted = remove.len();
        let version = self
            .log
            .append(TransactionDraft::compact(add, remove, metadata))
            .await?;

        // Steps 6-7 are past the commit: errors are deferred work, not
        // failures.
        self.publish(&plans).await;
        self.reclaim(&plans).await;

        let summary = CompactionSummary {
            transaction_version: version,
            partitions: plans.len(),
            files_compacted,
            total_rows,
            parquet_files: plans.iter().map(|p| p.artifact_path.clone()).collect(),
        };
        tracing::info!(
            version = summary.transaction_version,
            partitions = summary.partitions,
            files = summary.files_compacted,
            rows = summary.total_rows,
            "compaction committed"
        );
        Ok(CompactionOutcome::Compacted(summary))
    }

    /// Fetches, parses and encodes one partition's staging objects.
    async fn encode_partition(
        &self,
        schema: &SchemaDocument,
        group: &PartitionGroup,
        timestamp: &str,
    ) -> Result<PartitionPlan> {
        let mut records: Vec<Record> = Vec::new();

        for key in &group.keys {
            let bytes = retry(&self.retry_policy, || self.storage.get(key))
                .await
                .map_err(|e| LakeError::PartitionReadFailed {
                    partition: group.partition.clone(),
                    message: format!("failed to read '{key}': {e}"),
                })?;

            if bytes.is_empty() {
                return Err(LakeError::PartitionReadFailed {
                    partition: group.partition.clone(),
                    message: format!("staging object '{key}' is empty"),
                });
            }

            parse_staging_body(key, &bytes, &mut records).map_err(|message| {
                LakeError::PartitionReadFailed {
                    partition: group.partition.clone(),
                    message,
                }
            })?;
        }

        let encoded =
            self.encoder
                .encode(schema, &records)
                .map_err(|e| LakeError::EncodeFailed {
                    partition: group.partition.clone(),
                    message: e.to_string(),
                })?;

        Ok(PartitionPlan {
            artifact_path: LakePaths::artifact(&group.partition, timestamp),
            partition: group.partition.clone(),
            artifact_size: encoded.bytes.len() as u64,
            bytes: encoded.bytes,
            row_count: encoded.row_count,
            source_keys: group.keys.clone(),
        })
    }

    /// Step 6: writes artifact bytes under their final keys, in parallel.
    ///
    /// Writes are idempotent overwrites. A failure leaves a claim without an
    /// artifact, which `reconcile` surfaces; it is deliberately not an error.
    async fn publish(&self, plans: &[PartitionPlan]) {
        let results = join_all(plans.iter().map(|plan| async {
            retry(&self.retry_policy, || {
                self.storage.put(
                    &plan.artifact_path,
                    plan.bytes.clone(),
                    WritePrecondition::None,
                )
            })
            .await
            .map(|_| ())
            .map_err(|e| (plan.artifact_path.clone(), e))
        }))
        .await;

        for result in results {
            if let Err((path, err)) = result {
                tracing::error!(
                    artifact = %path,
                    error = %err,
                    "publish deferred: log references this artifact until reconciliation"
                );
            }
        }
    }

    /// Step 7: deletes the compacted staging objects.
    ///
    /// Failed deletes become orphans; `cleanup` removes them later.
    async fn reclaim(&self, plans: &[PartitionPlan]) {
        let keys = plans.iter().flat_map(|p| p.source_keys.iter());
        let results = join_all(keys.map(|key| async move {
            retry(&self.retry_policy, || self.storage.delete(key))
                .await
                .map_err(|e| (key.clone(), e))
        }))
        .await;

        for result in results {
            if let Err((key, err)) = result {
                tracing::error!(
                    staging = %key,
                    error = %err,
                    "reclaim deferred: staging object is an orphan until cleanup"
                );
            }
        }
    }
}

/// Parses one staging object body into records.
///
/// Keys without an `.ndjson` suffix hold a single JSON object; `.ndjson`
/// keys hold one JSON object per non-blank line.
fn parse_staging_body(
    key: &str,
    bytes: &[u8],
    records: &mut Vec<Record>,
) -> std::result::Result<(), String> {
    if key.ends_with(".ndjson") {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| format!("staging object '{key}' is not UTF-8: {e}"))?;
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(line)
                .map_err(|e| format!("failed to parse '{key}' line {line_no}: {e}"))?;
            records.push(into_record(key, value)?);
        }
        Ok(())
    } else {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| format!("failed to parse '{key}': {e}"))?;
        records.push(into_record(key, value)?);
        Ok(())
    }
}

fn into_record(key: &str, value: serde_json::Value) -> std::result::Result<Record, String> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(format!(
            "staging object '{key}' holds {} where an object was expected",
            kind_name(&other)
        )),
    }
}

fn kind_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_object_bodies_parse() {
        let mut records = Vec::new();
        parse_staging_body("data/p=A/x.json", br#"{"a": 1}"#, &mut records).expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["a"], 1);
    }

    #[test]
    fn ndjson_bodies_parse_per_line_skipping_blanks() {
        let mut records = Vec::new();
        parse_staging_body(
            "data/p=A/x.ndjson",
            b"{\"a\": 1}\n\n{\"a\": 2}\n   \n{\"a\": 3}\n",
            &mut records,
        )
        .expect("parse");
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn non_object_records_are_rejected() {
        let mut records = Vec::new();
        let err = parse_staging_body("data/p=A/x.json", b"[1, 2]", &mut records).unwrap_err();
        assert!(err.contains("an array"));

        let err =
            parse_staging_body("data/p=A/x.ndjson", b"42\n", &mut records).unwrap_err();
        assert!(err.contains("a number"));
    }

    #[test]
    fn ndjson_parse_errors_name_the_line() {
        let mut records = Vec::new();
        let err = parse_staging_body(
            "data/p=A/x.ndjson",
            b"{\"a\": 1}\n{broken\n",
            &mut records,
        )
        .unwrap_err();
        assert!(err.contains("line 1"));
    }
}
