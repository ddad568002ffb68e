//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use lakeside_core::{Error, Result};

/// Runtime configuration for both services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port for the ingestion gateway.
    pub gateway_port: u16,
    /// Port for the compaction service.
    pub compactor_port: u16,
    /// Field name the gateway partitions incoming records by. The derived
    /// partition is `{partition_field}={YYYY-MM-DDTHH}` from the current
    /// wall clock; the core never inspects this derivation.
    pub partition_field: String,
    /// Seconds after which a held compaction lock is recoverable.
    pub stale_lock_secs: u64,
    /// Seconds the cached schema document stays fresh.
    pub schema_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_port: 8080,
            compactor_port: 8081,
            partition_field: "order_ts_hour".to_string(),
            stale_lock_secs: 600,
            schema_ttl_secs: 60,
        }
    }
}

impl Config {
    /// Returns the stale-lock window as a duration.
    #[must_use]
    pub fn stale_lock(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }

    /// Returns the schema cache TTL as a duration.
    #[must_use]
    pub fn schema_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_ttl_secs)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for port collisions or an empty partition field.
    pub fn validate(&self) -> Result<()> {
        if self.gateway_port == self.compactor_port {
            return Err(Error::InvalidInput(
                "gateway and compactor ports must differ".to_string(),
            ));
        }
        if self.partition_field.trim().is_empty() || self.partition_field.contains('=') {
            return Err(Error::InvalidInput(
                "partition_field must be a non-empty name without '='".to_string(),
            ));
        }
        Ok(())
    }
}
