//! Orphan detection and cleanup.
//!
//! A committed entry's `remove` list is a claim; the reclaim that follows
//! it is best-effort. A staging object that a committed entry claims to
//! have removed but which still exists is an orphan. The reconciler derives
//! orphans from first principles — replay crossed with a live listing — so
//! it is pure, idempotent, and safe to run at any time: staging keys are
//! UUIDs and never reused, so deleting an orphan can never collide with a
//! gateway writer.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use lakeside_core::{LakePaths, StorageBackend};

use crate::error::Result;
use crate::txlog::TransactionLog;

/// Orphan report for the operator surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Artifact keys the lake considers live, sorted.
    pub parquet_files: Vec<String>,
    /// Staging keys claimed removed by the log but still present, sorted.
    pub orphaned_json_files: Vec<String>,
    /// Number of orphans.
    pub orphan_count: usize,
}

/// Result of deleting orphans.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Number of orphans deleted.
    pub deleted_count: usize,
    /// The deleted keys, sorted.
    pub deleted_files: Vec<String>,
}

/// Anti-entropy reconciler over the staging area and the log.
#[derive(Clone)]
pub struct Reconciler {
    storage: Arc<dyn StorageBackend>,
    log: TransactionLog,
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            log: TransactionLog::new(Arc::clone(&storage)),
            storage,
        }
    }

    /// Computes the orphan report.
    ///
    /// Orphans are the intersection of the log's removed-staging claims with
    /// the current staging listing.
    ///
    /// # Errors
    ///
    /// Returns an error if replay or listing fails.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let replay = self.log.replay().await?;

        let staging: BTreeSet<String> = self
            .storage
            .list(LakePaths::STAGING_PREFIX)
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .collect();

        let orphans: Vec<String> = replay
            .removed_staging
            .intersection(&staging)
            .cloned()
            .collect();

        if !orphans.is_empty() {
            tracing::warn!(count = orphans.len(), "staging orphans detected");
        }

        Ok(ReconcileReport {
            parquet_files: replay.live_artifacts.into_iter().collect(),
            orphan_count: orphans.len(),
            orphaned_json_files: orphans,
        })
    }

    /// Deletes all orphans.
    ///
    /// Per-key failures are logged and skipped; the next run retries them.
    ///
    /// # Errors
    ///
    /// Returns an error if the orphan report itself cannot be computed.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let report = self.reconcile().await?;

        let mut deleted_files = Vec::with_capacity(report.orphaned_json_files.len());
        for key in &report.orphaned_json_files {
            match self.storage.delete(key).await {
                Ok(()) => deleted_files.push(key.clone()),
                Err(err) => {
                    tracing::error!(staging = %key, error = %err, "failed to delete orphan");
                }
            }
        }

        tracing::info!(deleted = deleted_files.len(), "orphan cleanup complete");
        Ok(CleanupReport {
            deleted_count: deleted_files.len(),
            deleted_files,
        })
    }
}
