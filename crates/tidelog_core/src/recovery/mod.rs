//! Crash recovery.
//!
//! A run scans the log tail ([`tail`]), resolves where to start
//! ([`start`]), undoes and replays transactions through the
//! [`StorageEngine`] ([`orchestrator`], optionally [`parallel`]), rolls back
//! what never completed ([`completeness`]) and cuts off what cannot be read
//! ([`truncator`]).

pub mod completeness;
pub mod locks;
pub mod monitor;
pub mod orchestrator;
pub mod parallel;
pub mod start;
pub mod storage;
pub mod tail;
pub mod truncator;

pub use completeness::{
    IncompleteTransaction, IncompleteTransactionSet, OpenTransaction,
    TransactionCompletenessTracker,
};
pub use locks::{EntityLocks, LockGroup};
pub use monitor::{
    LogProgressReporter, LoggingRecoveryMonitor, ProgressReporter, RecoveryCancellation,
    RecoveryMonitor,
};
pub use orchestrator::{
    Recovery, RecoveryContext, RecoveryOutcome, RecoveryState, RECOVERY_COMPLETED_REASON,
};
pub use parallel::ParallelRecoveryApplier;
pub use start::{resolve_recovery_start, RecoveryStartInformation};
pub use storage::{ApplicationMode, StorageEngine, TransactionMetadata};
pub use tail::{CheckpointInfo, LogTailScanner, LogTailState, ScanOutcome};
pub use truncator::CorruptedLogsTruncator;
