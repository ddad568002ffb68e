//! # lakeside-test-utils
//!
//! Shared test infrastructure for the Lakeside workspace:
//!
//! - [`storage`] — an in-memory backend that records every operation and
//!   supports per-operation failure injection
//! - [`fixtures`] — canonical schema documents and staging writers
//! - [`parquet`] — read-back helpers for round-trip assertions
//!
//! Production code must never depend on this crate.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod fixtures;
pub mod parquet;
pub mod storage;

pub use storage::{StorageOp, TracingMemoryBackend};
