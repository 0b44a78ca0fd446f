//! # Tidelog Core
//!
//! Write-ahead log format and crash recovery for tidelog.
//!
//! This crate provides:
//! - The segmented transaction log: header, entry codec, reader, writer
//! - Transaction cursors, forward and reversed
//! - Log tail scanning and recovery start resolution
//! - Two-pass recovery against a [`StorageEngine`], sequential or parallel
//! - Archiving truncation of corrupted log tails
//!
//! ## Example
//!
//! ```ignore
//! let store = Arc::new(FileSegmentStore::open(&log_dir)?);
//! let files = LogFiles::new(store, store_id);
//! let context = RecoveryContext::new(files, storage, &log_dir)
//!     .with_config(RecoveryConfig::default().parallel_recovery(true));
//! let outcome = Recovery::new(context).run()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod availability;
mod config;
mod error;
pub mod log;
pub mod recovery;
mod types;

pub use availability::{AvailabilityGuard, UnavailableGuard};
pub use config::{LogConfig, RecoveryConfig, DEFAULT_ARCHIVE_DIR_NAME};
pub use error::{CoreError, CoreResult};
pub use log::{Command, CommandBatch, CommittedTransaction, LogEntry, LogFiles, LogWriter};
pub use recovery::{
    ApplicationMode, LockGroup, Recovery, RecoveryContext, RecoveryOutcome, StorageEngine,
    TransactionMetadata,
};
pub use types::{now_millis, LogPosition, StoreId, TransactionId, INITIAL_LOG_VERSION};
