//! # lakeside-lake
//!
//! The compaction core of the Lakeside data lake: the pieces that determine
//! the system's correctness.
//!
//! - [`partition`] — groups staging keys by Hive partition (pure)
//! - [`txlog`] — the append-only, CAS-guarded transaction log
//! - [`coordinator`] — the singleton lock serializing compactions
//! - [`compactor`] — the orchestrator driving one compaction end to end
//! - [`schema`] — the schema document, record validation and cache
//! - [`encoder`] — schema-driven parquet encoding
//! - [`reconciler`] — orphan detection and cleanup
//!
//! The design carries two exclusion mechanisms on purpose. The coordinator
//! gives coarse exclusion and observability across the whole multi-step
//! compaction; the log's conditional write gives fine exclusion on the
//! single linearization point. The coordinator can be forcibly released,
//! and the CAS alone cannot protect the non-idempotent reclaim step, so
//! neither suffices alone.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod compactor;
pub mod coordinator;
pub mod encoder;
pub mod error;
pub mod partition;
pub mod reconciler;
pub mod schema;
pub mod txlog;

pub use compactor::{CompactionOutcome, CompactionSummary, Compactor};
pub use coordinator::{
    AcquireOutcome, CompactionCoordinator, CoordinatorState, CoordinatorStatus, DEFAULT_STALE_AFTER,
};
pub use encoder::{EncodeError, EncodedArtifact, ParquetEncoder, RecordEncoder};
pub use error::{LakeError, Result};
pub use partition::{PartitionGroup, group_by_partition};
pub use reconciler::{CleanupReport, ReconcileReport, Reconciler};
pub use schema::{
    PrimitiveType, Record, Repetition, SchemaCache, SchemaDocument, SchemaField, validate_record,
};
pub use txlog::{
    FileAction, LogOperation, LogReadResult, Replay, TransactionDraft, TransactionEntry,
    TransactionLog,
};
