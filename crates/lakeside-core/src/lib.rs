//! # lakeside-core
//!
//! Core abstractions for the Lakeside data lake pipeline.
//!
//! This crate provides the foundational pieces shared by every Lakeside
//! component:
//!
//! - **Storage contract**: the object-store trait with conditional writes,
//!   plus an in-memory backend for tests
//! - **Paths**: the single source of truth for the persisted key layout
//! - **Errors**: shared error definitions and result types
//! - **Retry**: bounded exponential backoff for idempotent storage calls
//! - **Observability**: one-shot logging bootstrap and format selection
//!
//! Higher layers (`lakeside-lake`, `lakeside-server`) depend on this crate
//! and never on each other's internals.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod error;
pub mod observability;
pub mod paths;
pub mod retry;
pub mod storage;

pub use error::{Error, Result};
pub use observability::{LogFormat, init_logging};
pub use paths::LakePaths;
pub use retry::{RetryPolicy, retry};
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
