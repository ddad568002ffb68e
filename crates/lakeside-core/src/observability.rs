//! Logging bootstrap shared by the services and the CLI.
//!
//! Every Lakeside process funnels through [`init_logging`] so exactly one
//! subscriber gets installed no matter how many services share the
//! process. Operators pick the output shape (`--log-format` /
//! `LAKESIDE_LOG_FORMAT`); verbosity stays with `RUST_LOG`.

use std::str::FromStr;
use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::error::Error;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON event per line, for log pipelines.
    Json,
    /// Human-readable output, for terminals.
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(Error::InvalidInput(format!(
                "unknown log format '{other}' (expected 'json' or 'pretty')"
            ))),
        }
    }
}

/// Installs the global tracing subscriber.
///
/// The first call wins; later calls from co-hosted services or repeated
/// test setups change nothing. Defaults to `info` when `RUST_LOG` is
/// unset.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        match format {
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });
}
