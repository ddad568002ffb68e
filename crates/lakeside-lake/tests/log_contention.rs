//! Transaction log behavior under concurrent and contended appends.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use lakeside_core::{MemoryBackend, StorageBackend};
use lakeside_lake::{
    CompactionCoordinator, Compactor, FileAction, LakeError, SchemaCache, TransactionDraft,
    TransactionLog,
};
use lakeside_test_utils::TracingMemoryBackend;
use lakeside_test_utils::fixtures::{order_schema, stage_record, write_schema};
use lakeside_test_utils::storage::StorageOp;

fn draft(n: u64) -> TransactionDraft {
    TransactionDraft::compact(
        vec![FileAction::add(
            format!("parquet/p=A/part-{n}.parquet"),
            10,
            1,
            "p=A",
        )],
        vec![FileAction::remove(format!("data/p=A/{n}.json"))],
        BTreeMap::new(),
    )
}

#[tokio::test]
async fn concurrent_appends_settle_on_distinct_dense_versions() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let log_a = TransactionLog::new(backend.clone());
    let log_b = TransactionLog::new(backend);

    // Both writers race from the same advisory next-version. Exactly one
    // wins version 0; the other retries and lands on version 1.
    let (a, b) = tokio::join!(log_a.append(draft(1)), log_b.append(draft(2)));
    let (a, b) = (a.expect("append a"), b.expect("append b"));

    let mut versions = vec![a, b];
    versions.sort_unstable();
    assert_eq!(versions, vec![0, 1]);

    let read = log_a.read_all().await.expect("read");
    let read_versions: Vec<u64> = read.entries.iter().map(|e| e.version).collect();
    assert_eq!(read_versions, vec![0, 1]);
    assert!(read.missing_versions.is_empty());
}

#[tokio::test]
async fn many_sequential_appends_stay_dense() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let log = TransactionLog::new(backend);

    for expected in 0..10 {
        let version = log.append(draft(expected)).await.expect("append");
        assert_eq!(version, expected);
    }

    let read = log.read_all().await.expect("read");
    assert_eq!(read.entries.len(), 10);
    assert!(read.missing_versions.is_empty());
}

#[tokio::test]
async fn contention_beyond_the_retry_budget_surfaces() {
    let storage = Arc::new(TracingMemoryBackend::new());
    let backend: Arc<dyn StorageBackend> = storage.clone();
    let log = TransactionLog::new(backend);

    // Every conditional log write loses the race.
    storage.contend_cas_puts("_log/");

    let err = log.append(draft(1)).await.unwrap_err();
    assert!(matches!(err, LakeError::LogContention { .. }));

    // The append gave up after its bounded budget of conditional writes.
    let cas_attempts = storage
        .operations()
        .iter()
        .filter(|op| matches!(op, StorageOp::Put { path, .. } if path.starts_with("_log/")))
        .count();
    assert_eq!(cas_attempts, 5);
}

#[tokio::test]
async fn contended_compaction_releases_the_lock_and_leaves_staging_intact() {
    let storage = Arc::new(TracingMemoryBackend::new());
    let backend: Arc<dyn StorageBackend> = storage.clone();
    let coordinator = Arc::new(CompactionCoordinator::new(backend.clone()));
    let schema = Arc::new(SchemaCache::new(backend.clone()));
    let compactor = Compactor::new(backend, coordinator.clone(), schema);

    write_schema(storage.as_ref(), &order_schema())
        .await
        .expect("schema");
    stage_record(
        storage.as_ref(),
        "p=A",
        "a",
        &json!({"order_id": "o-1", "qty": 1}),
    )
    .await
    .expect("stage");

    storage.contend_cas_puts("_log/");

    let err = compactor.run().await.unwrap_err();
    assert!(matches!(err, LakeError::LogContention { .. }));

    // Pre-commit failure: lock released, nothing published, nothing
    // reclaimed. The next run will retry from scratch.
    assert!(!coordinator.status().await.expect("status").busy);
    let paths = storage.paths();
    assert_eq!(paths.iter().filter(|p| p.starts_with("data/")).count(), 1);
    assert_eq!(paths.iter().filter(|p| p.starts_with("parquet/")).count(), 0);
}
