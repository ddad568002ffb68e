//! Error types for lake operations.
//!
//! The taxonomy distinguishes pre-commit failures (which propagate to the
//! caller and leave the log untouched) from post-commit conditions, which
//! are never surfaced as errors: once the transaction entry is committed the
//! lake has advanced, and deferred publish/reclaim work is the reconciler's
//! business.

use thiserror::Error;

/// Result type alias for lake operations.
pub type Result<T> = std::result::Result<T, LakeError>;

/// Errors that can occur during compaction and log operations.
#[derive(Debug, Error)]
pub enum LakeError {
    /// The schema document is missing or malformed. Fails fast, before any
    /// lock is taken.
    #[error("schema unavailable: {message}")]
    SchemaUnavailable {
        /// Description of why the schema could not be used.
        message: String,
    },

    /// The coordinator is already held by another compaction.
    #[error("compaction already in progress: batch of {batch_size}, running for {age_ms} ms")]
    Busy {
        /// Size of the in-flight batch.
        batch_size: usize,
        /// Milliseconds since the in-flight compaction started.
        age_ms: i64,
    },

    /// One or more staging objects in a partition were unreadable.
    #[error("partition read failed for '{partition}': {message}")]
    PartitionReadFailed {
        /// The partition whose staging objects could not be read.
        partition: String,
        /// Description of the read failure.
        message: String,
    },

    /// The encoder rejected a partition's records.
    #[error("encode failed for '{partition}': {message}")]
    EncodeFailed {
        /// The partition whose records were rejected.
        partition: String,
        /// Per-field detail from the encoder.
        message: String,
    },

    /// The log append lost the CAS race beyond its retry budget.
    #[error("log contention: {message}")]
    LogContention {
        /// Description of the contention.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl LakeError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl From<lakeside_core::Error> for LakeError {
    fn from(err: lakeside_core::Error) -> Self {
        match err {
            lakeside_core::Error::Serialization { message } => Self::Serialization { message },
            other => Self::Storage {
                message: other.to_string(),
            },
        }
    }
}
