//! Lakeside service binary.
//!
//! ```bash
//! # Run both services (gateway on 8080, compaction service on 8081)
//! lakeside serve
//!
//! # Run a single compaction pass and print the outcome
//! lakeside compact
//! ```
//!
//! The binary wires an in-memory backend by default, which is suitable for
//! development and demos only; deployments embed the routers from
//! `lakeside_server` over a real object-store backend.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use lakeside_core::{LogFormat, MemoryBackend, StorageBackend, init_logging};
use lakeside_lake::{CompactionCoordinator, CompactionOutcome, Compactor, SchemaCache};
use lakeside_server::{Config, serve};

/// Lakeside ingestion and compaction services.
#[derive(Debug, Parser)]
#[command(name = "lakeside")]
#[command(about = "Streaming ingestion and compaction for an object-store data lake")]
#[command(version)]
struct Args {
    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "LAKESIDE_LOG_FORMAT", default_value = "pretty", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the gateway and compaction services.
    Serve {
        /// Port for the ingestion gateway.
        #[arg(long, env = "LAKESIDE_GATEWAY_PORT", default_value = "8080")]
        gateway_port: u16,

        /// Port for the compaction service.
        #[arg(long, env = "LAKESIDE_COMPACTOR_PORT", default_value = "8081")]
        compactor_port: u16,

        /// Field name the gateway partitions incoming records by.
        #[arg(long, env = "LAKESIDE_PARTITION_FIELD", default_value = "order_ts_hour")]
        partition_field: String,

        /// Seconds after which a held compaction lock is recoverable.
        #[arg(long, env = "LAKESIDE_STALE_LOCK_SECS", default_value = "600")]
        stale_lock_secs: u64,

        /// Seconds the cached schema document stays fresh.
        #[arg(long, env = "LAKESIDE_SCHEMA_TTL_SECS", default_value = "60")]
        schema_ttl_secs: u64,
    },

    /// Run a single compaction pass.
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_format: LogFormat = args.log_format.parse()?;
    init_logging(log_format);

    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    tracing::warn!("using in-memory storage: the lake will not survive a restart");

    match args.command {
        Commands::Serve {
            gateway_port,
            compactor_port,
            partition_field,
            stale_lock_secs,
            schema_ttl_secs,
        } => {
            let config = Config {
                gateway_port,
                compactor_port,
                partition_field,
                stale_lock_secs,
                schema_ttl_secs,
            };
            serve(config, storage).await?;
        }

        Commands::Compact => {
            let coordinator = Arc::new(CompactionCoordinator::new(Arc::clone(&storage)));
            let schema = Arc::new(SchemaCache::new(Arc::clone(&storage)));
            let compactor = Compactor::new(storage, coordinator, schema);

            match compactor.run().await? {
                CompactionOutcome::NoFiles => tracing::info!("no files to compact"),
                CompactionOutcome::Compacted(summary) => tracing::info!(
                    version = summary.transaction_version,
                    partitions = summary.partitions,
                    files = summary.files_compacted,
                    rows = summary.total_rows,
                    "compaction complete"
                ),
            }
        }
    }

    Ok(())
}
