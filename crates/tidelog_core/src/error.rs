//! Error types for tidelog core.

use crate::types::{LogPosition, StoreId, TransactionId};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while reading, writing or recovering the log.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tidelog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log contains bytes that cannot be decoded.
    #[error("log corruption at {position}: {message}")]
    LogCorruption {
        /// Where the corruption was detected.
        position: LogPosition,
        /// Description of the corruption.
        message: String,
    },

    /// A stored checksum does not match the data it covers.
    #[error("checksum mismatch at {position}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Position of the entry carrying the checksum.
        position: LogPosition,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// A segment belongs to a different store.
    #[error("log segment {version} belongs to store {found}, expected {expected}")]
    StoreIdMismatch {
        /// The offending segment.
        version: u64,
        /// Identity of the store being recovered.
        expected: StoreId,
        /// Identity found in the segment header.
        found: StoreId,
    },

    /// No checkpoint exists and the earliest log versions have been pruned.
    #[error(
        "no checkpoint found in the transaction logs and log version {oldest_version} is the \
         oldest available; the logs required to recover from the beginning have been removed"
    )]
    MissingCheckpointHistory {
        /// Oldest log version that still exists.
        oldest_version: u64,
    },

    /// The store has committed data but its transaction logs are gone.
    #[error(
        "transaction logs are missing for a store that has committed transactions; set \
         `fail_on_missing_logs = false` to start from a fresh log"
    )]
    LogsMissing,

    /// Recovery hit corruption and is configured to fail on it.
    #[error(
        "unable to recover from corrupted transaction logs: {source}; set \
         `fail_on_corrupted_logs = false` to recover as far as possible and truncate the \
         corrupted part of the log (the removed data is archived but not replayed)"
    )]
    UnableToRecover {
        /// The corruption that stopped recovery.
        #[source]
        source: Box<CoreError>,
    },

    /// Recovery was canceled at a transaction boundary.
    #[error("recovery canceled")]
    RecoveryCanceled,

    /// A parallel apply worker failed.
    #[error("parallel recovery worker failed: {message}")]
    ParallelApplyFailed {
        /// Description of the failure.
        message: String,
    },

    /// Parallel apply workers did not drain in time.
    #[error("parallel recovery did not finish within {timeout:?}")]
    ParallelApplyTimeout {
        /// The configured close timeout.
        timeout: Duration,
    },

    /// The storage engine rejected a transaction.
    #[error("failed to apply {tx_id}: {message}")]
    Apply {
        /// The transaction being applied.
        tx_id: TransactionId,
        /// Description of the failure.
        message: String,
    },

    /// Invalid log format or version.
    #[error("invalid log format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Invalid argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a log corruption error.
    pub fn log_corruption(position: LogPosition, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            position,
            message: message.into(),
        }
    }

    /// Wraps a corruption error with the escape hatch message.
    pub fn unable_to_recover(source: Self) -> Self {
        Self::UnableToRecover {
            source: Box::new(source),
        }
    }

    /// Creates a storage apply error.
    pub fn apply(tx_id: TransactionId, message: impl Into<String>) -> Self {
        Self::Apply {
            tx_id,
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns `true` for structural damage to the log.
    ///
    /// These are the errors `fail_on_corrupted_logs = false` tolerates.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::LogCorruption { .. } | Self::ChecksumMismatch { .. })
    }
}
