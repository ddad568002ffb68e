//! Canonical storage paths for the Lakeside lake.
//!
//! This module is the single source of truth for every key the system
//! reads or writes. No hardcoded path strings should exist outside it.
//!
//! # Key layout
//!
//! ```text
//! schema/schema.json                       — schema document (schema manager owns writes)
//! data/{field}={value}/{uuid}.json         — single-record staging object
//! data/{field}={value}/{uuid}.ndjson       — batch staging object
//! parquet/{field}={value}/part-{ts}.parquet — compacted artifact
//! _log/{version:08}.json                   — transaction entry
//! _state/global-compaction-lock.json       — coordinator state (outside the
//!                                            lake namespaces; a separate
//!                                            durable concern)
//! ```

use chrono::{DateTime, Utc};

/// Canonical path generator and parser for lake storage.
pub struct LakePaths;

impl LakePaths {
    /// Schema document key.
    pub const SCHEMA: &'static str = "schema/schema.json";

    /// Prefix under which the gateway stages incoming records.
    pub const STAGING_PREFIX: &'static str = "data/";

    /// Prefix under which compacted artifacts are published.
    pub const ARTIFACT_PREFIX: &'static str = "parquet/";

    /// Prefix of the transaction log.
    pub const LOG_PREFIX: &'static str = "_log/";

    /// Durable coordinator state key.
    pub const COORDINATOR_STATE: &'static str = "_state/global-compaction-lock.json";

    /// Returns the staging key for a record object.
    #[must_use]
    pub fn staging_object(partition: &str, id: &str, ext: &str) -> String {
        format!("data/{partition}/{id}.{ext}")
    }

    /// Returns the artifact key for a partition and path-safe timestamp.
    #[must_use]
    pub fn artifact(partition: &str, timestamp: &str) -> String {
        format!("parquet/{partition}/part-{timestamp}.parquet")
    }

    /// Returns the transaction log key for a version.
    #[must_use]
    pub fn log_entry(version: u64) -> String {
        format!("_log/{version:08}.json")
    }

    /// Extracts the partition segment from a staging key.
    ///
    /// Applies the anchored `data/<segment>/` shape: the key must start with
    /// the staging prefix and have at least one further path separator.
    /// Returns `None` for keys outside the staging namespace and for empty
    /// or non-Hive (`field=value`) partition segments — those keys must not
    /// be touched by compaction.
    #[must_use]
    pub fn partition_of(key: &str) -> Option<&str> {
        let rest = key.strip_prefix(Self::STAGING_PREFIX)?;
        let (segment, _) = rest.split_once('/')?;
        if Self::is_well_formed_partition(segment) {
            Some(segment)
        } else {
            None
        }
    }

    /// Returns true for a Hive-convention `field=value` partition segment
    /// with non-empty field and value.
    #[must_use]
    pub fn is_well_formed_partition(segment: &str) -> bool {
        segment
            .split_once('=')
            .is_some_and(|(field, value)| !field.is_empty() && !value.is_empty())
    }

    /// Extracts the version number from a transaction log key.
    ///
    /// The key must match `_log/<digits>.json` exactly; anything else in the
    /// log prefix (tombstones, partial uploads) is ignored by the reader.
    #[must_use]
    pub fn log_version_of(key: &str) -> Option<u64> {
        let name = key.strip_prefix(Self::LOG_PREFIX)?;
        let digits = name.strip_suffix(".json")?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Renders a timestamp in the path-safe form used in artifact keys:
    /// colons replaced with dashes, sub-second precision dropped.
    #[must_use]
    pub fn path_safe_timestamp(at: DateTime<Utc>) -> String {
        at.format("%Y-%m-%dT%H-%M-%S").to_string()
    }
}
