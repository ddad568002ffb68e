//! Compaction coordinator: the singleton mutex guarding the critical section.
//!
//! One logical coordinator exists per deployment, keyed by a fixed durable
//! state key. Its operations are serialized by construction: every method
//! holds a per-instance async mutex for its whole duration, so no two
//! operations on the same instance ever interleave.
//!
//! The durable state is `{busy, batch, startedAt}`. Idle state carries no
//! batch and no start time. A lock held longer than the stale window is
//! recovered to idle exactly once, when the instance first loads its state —
//! this is the only automatic transition out of the held state and is how a
//! crashed holder's lock is reclaimed.
//!
//! The coordinator provides coarse exclusion and observability across the
//! whole multi-step compaction; the transaction log's CAS provides fine
//! exclusion on the single linearization point. Either alone is
//! insufficient.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use lakeside_core::{LakePaths, StorageBackend, WritePrecondition};

use crate::error::{LakeError, Result};

/// Stale window after which a held lock is recoverable (10 minutes).
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);

/// Durable coordinator state.
///
/// Invariant: `busy == false` implies `batch` and `started_at` are absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorState {
    /// Whether a compaction currently holds the lock.
    pub busy: bool,
    /// The held compaction's frozen batch of staging keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<Vec<String>>,
    /// When the held compaction started, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
}

impl CoordinatorState {
    fn idle() -> Self {
        Self::default()
    }

    fn age_ms(&self) -> i64 {
        self.started_at
            .map_or(0, |started| Utc::now().timestamp_millis() - started)
    }
}

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The lock was acquired; the caller owns the critical section.
    Acquired,
    /// Another compaction holds the lock.
    Busy {
        /// Size of the in-flight batch.
        batch_size: usize,
        /// Milliseconds since the in-flight compaction started.
        age_ms: i64,
    },
}

/// Operator-visible coordinator status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    /// Whether a compaction currently holds the lock.
    pub busy: bool,
    /// Size of the in-flight batch, when busy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// When the in-flight compaction started, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
}

/// The distributed compaction lock.
pub struct CompactionCoordinator {
    storage: Arc<dyn StorageBackend>,
    stale_after: Duration,
    // None until the first operation loads the durable state.
    state: Mutex<Option<CoordinatorState>>,
}

impl CompactionCoordinator {
    /// Creates a coordinator with the default stale window.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self::with_stale_after(storage, DEFAULT_STALE_AFTER)
    }

    /// Creates a coordinator with an explicit stale window.
    #[must_use]
    pub fn with_stale_after(storage: Arc<dyn StorageBackend>, stale_after: Duration) -> Self {
        Self {
            storage,
            stale_after,
            state: Mutex::new(None),
        }
    }

    /// Attempts to acquire the lock for the given batch.
    ///
    /// Returns `Busy` with diagnostics when another compaction holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if durable state cannot be read or written.
    pub async fn try_acquire(&self, batch: Vec<String>) -> Result<AcquireOutcome> {
        let mut guard = self.state.lock().await;
        let state = self.loaded(&mut guard).await?;

        if state.busy {
            let outcome = AcquireOutcome::Busy {
                batch_size: state.batch.as_ref().map_or(0, Vec::len),
                age_ms: state.age_ms(),
            };
            tracing::info!(
                batch_size = state.batch.as_ref().map_or(0, Vec::len),
                age_ms = state.age_ms(),
                "compaction lock is held"
            );
            return Ok(outcome);
        }

        let next = CoordinatorState {
            busy: true,
            batch: Some(batch),
            started_at: Some(Utc::now().timestamp_millis()),
        };
        self.persist(&next).await?;
        *guard = Some(next);
        Ok(AcquireOutcome::Acquired)
    }

    /// Releases the lock. A release from idle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if durable state cannot be read or written.
    pub async fn release(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = self.loaded(&mut guard).await?;

        if state.busy {
            let idle = CoordinatorState::idle();
            self.persist(&idle).await?;
            *guard = Some(idle);
        }
        Ok(())
    }

    /// Forcibly releases the lock (administrative operation).
    ///
    /// # Errors
    ///
    /// Returns an error if durable state cannot be read or written.
    pub async fn force_release(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = self.loaded(&mut guard).await?;

        if state.busy {
            tracing::warn!(
                batch_size = state.batch.as_ref().map_or(0, Vec::len),
                age_ms = state.age_ms(),
                "compaction lock forcibly released"
            );
            let idle = CoordinatorState::idle();
            self.persist(&idle).await?;
            *guard = Some(idle);
        }
        Ok(())
    }

    /// Returns a snapshot of the coordinator state.
    ///
    /// # Errors
    ///
    /// Returns an error if durable state cannot be read.
    pub async fn status(&self) -> Result<CoordinatorStatus> {
        let mut guard = self.state.lock().await;
        let state = self.loaded(&mut guard).await?;

        Ok(CoordinatorStatus {
            busy: state.busy,
            batch_size: state.batch.as_ref().map(Vec::len),
            started_at: state.started_at,
        })
    }

    /// Loads durable state on first use, applying stale-lock recovery.
    ///
    /// Recovery runs exactly once per instance load: a held lock older than
    /// the stale window is persisted back as idle, with a warning.
    async fn loaded<'a>(
        &self,
        guard: &'a mut MutexGuard<'_, Option<CoordinatorState>>,
    ) -> Result<&'a CoordinatorState> {
        if guard.is_none() {
            let mut state = self.load_durable().await?;

            if state.busy {
                let age_ms = state.age_ms();
                if age_ms > self.stale_after.as_millis() as i64 {
                    tracing::warn!(
                        age_ms,
                        stale_after_ms = self.stale_after.as_millis() as u64,
                        "recovering stale compaction lock"
                    );
                    state = CoordinatorState::idle();
                    self.persist(&state).await?;
                }
            }

            **guard = Some(state);
        }

        Ok(guard.get_or_insert(CoordinatorState::idle()))
    }

    async fn load_durable(&self) -> Result<CoordinatorState> {
        match self.storage.get(LakePaths::COORDINATOR_STATE).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                LakeError::serialization(format!("failed to parse coordinator state: {e}"))
            }),
            Err(err) if err.is_not_found() => Ok(CoordinatorState::idle()),
            Err(err) => Err(err.into()),
        }
    }

    async fn persist(&self, state: &CoordinatorState) -> Result<()> {
        let json = serde_json::to_vec(state).map_err(|e| {
            LakeError::serialization(format!("failed to serialize coordinator state: {e}"))
        })?;
        // Single writer by construction; no precondition needed.
        self.storage
            .put(
                LakePaths::COORDINATOR_STATE,
                Bytes::from(json),
                WritePrecondition::None,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeside_core::MemoryBackend;

    fn batch(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("data/p=A/{i}.json")).collect()
    }

    #[tokio::test]
    async fn acquire_release_cycle() {
        let backend = Arc::new(MemoryBackend::new());
        let coordinator = CompactionCoordinator::new(backend);

        let outcome = coordinator.try_acquire(batch(3)).await.expect("acquire");
        assert_eq!(outcome, AcquireOutcome::Acquired);

        let status = coordinator.status().await.expect("status");
        assert!(status.busy);
        assert_eq!(status.batch_size, Some(3));
        assert!(status.started_at.is_some());

        coordinator.release().await.expect("release");

        let status = coordinator.status().await.expect("status");
        assert!(!status.busy);
        assert_eq!(status.batch_size, None);
        assert_eq!(status.started_at, None);
    }

    #[tokio::test]
    async fn second_acquire_reports_busy_with_diagnostics() {
        let backend = Arc::new(MemoryBackend::new());
        let coordinator = CompactionCoordinator::new(backend);

        coordinator.try_acquire(batch(5)).await.expect("acquire");

        match coordinator.try_acquire(batch(1)).await.expect("second") {
            AcquireOutcome::Busy { batch_size, age_ms } => {
                assert_eq!(batch_size, 5);
                assert!(age_ms >= 0);
            }
            AcquireOutcome::Acquired => panic!("lock should be held"),
        }
    }

    #[tokio::test]
    async fn release_from_idle_is_a_noop() {
        let backend = Arc::new(MemoryBackend::new());
        let coordinator = CompactionCoordinator::new(backend);

        coordinator.release().await.expect("first release");
        coordinator.release().await.expect("second release");
        assert!(!coordinator.status().await.expect("status").busy);
    }

    #[tokio::test]
    async fn force_release_unsticks_a_held_lock() {
        let backend = Arc::new(MemoryBackend::new());
        let coordinator = CompactionCoordinator::new(backend);

        coordinator.try_acquire(batch(2)).await.expect("acquire");
        coordinator.force_release().await.expect("force release");

        let outcome = coordinator.try_acquire(batch(1)).await.expect("reacquire");
        assert_eq!(outcome, AcquireOutcome::Acquired);
    }

    #[tokio::test]
    async fn stale_lock_recovers_on_instance_load() {
        let backend = Arc::new(MemoryBackend::new());

        // A previous instance crashed mid-compaction eleven minutes ago.
        let stale = CoordinatorState {
            busy: true,
            batch: Some(batch(4)),
            started_at: Some(Utc::now().timestamp_millis() - 11 * 60 * 1000),
        };
        backend
            .put(
                LakePaths::COORDINATOR_STATE,
                Bytes::from(serde_json::to_vec(&stale).expect("serialize")),
                WritePrecondition::None,
            )
            .await
            .expect("seed");

        let coordinator = CompactionCoordinator::new(backend);
        let outcome = coordinator.try_acquire(batch(1)).await.expect("acquire");
        assert_eq!(outcome, AcquireOutcome::Acquired);
    }

    #[tokio::test]
    async fn fresh_lock_is_not_recovered() {
        let backend = Arc::new(MemoryBackend::new());

        let held = CoordinatorState {
            busy: true,
            batch: Some(batch(4)),
            started_at: Some(Utc::now().timestamp_millis() - 1000),
        };
        backend
            .put(
                LakePaths::COORDINATOR_STATE,
                Bytes::from(serde_json::to_vec(&held).expect("serialize")),
                WritePrecondition::None,
            )
            .await
            .expect("seed");

        let coordinator = CompactionCoordinator::new(backend);
        match coordinator.try_acquire(batch(1)).await.expect("acquire") {
            AcquireOutcome::Busy { batch_size, .. } => assert_eq!(batch_size, 4),
            AcquireOutcome::Acquired => panic!("fresh lock must not be recovered"),
        }
    }

    #[tokio::test]
    async fn recovery_happens_once_per_load_and_persists() {
        let backend = Arc::new(MemoryBackend::new());

        let stale = CoordinatorState {
            busy: true,
            batch: Some(batch(2)),
            started_at: Some(Utc::now().timestamp_millis() - 11 * 60 * 1000),
        };
        backend
            .put(
                LakePaths::COORDINATOR_STATE,
                Bytes::from(serde_json::to_vec(&stale).expect("serialize")),
                WritePrecondition::None,
            )
            .await
            .expect("seed");

        let coordinator = CompactionCoordinator::new(backend.clone());
        assert!(!coordinator.status().await.expect("status").busy);

        // The recovered idle state is durable: a second instance loads idle.
        let second = CompactionCoordinator::new(backend);
        assert!(!second.status().await.expect("status").busy);
    }

    #[test]
    fn idle_state_serializes_without_batch_fields() {
        let json = serde_json::to_string(&CoordinatorState::idle()).expect("serialize");
        assert_eq!(json, r#"{"busy":false}"#);
    }
}
