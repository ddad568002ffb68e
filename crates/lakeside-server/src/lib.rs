//! # lakeside-server
//!
//! HTTP surfaces for the Lakeside data lake:
//!
//! - the **ingestion gateway** (`PUT /`, `POST /batch`): validates records
//!   against the schema and writes staging objects
//! - the **compaction service** (`POST /`, `GET /`, `GET /transactions`,
//!   `GET /reconcile`, `DELETE /cleanup`): drives and observes the
//!   compaction core
//!
//! The two services share one [`server::AppState`] and run on separate
//! ports.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod routes;
pub mod server;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use server::{AppState, compaction_router, gateway_router, serve};
