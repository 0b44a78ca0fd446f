//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Attempted to grow a store through `truncate`.
    #[error("cannot truncate to {requested} bytes, current size is {size}")]
    TruncateBeyondEnd {
        /// The requested size.
        requested: u64,
        /// The current size.
        size: u64,
    },

    /// No segment exists for the requested log version.
    #[error("log segment {version} does not exist")]
    SegmentNotFound {
        /// The missing log version.
        version: u64,
    },

    /// A segment already exists for the requested log version.
    #[error("log segment {version} already exists")]
    SegmentExists {
        /// The existing log version.
        version: u64,
    },

    /// Another process holds the log directory lock.
    #[error("log directory locked by another process: {}", path.display())]
    DirectoryLocked {
        /// The locked directory.
        path: PathBuf,
    },
}
