//! The storage contract recovery applies transactions through.

use crate::error::CoreResult;
use crate::log::CommittedTransaction;
use crate::recovery::completeness::IncompleteTransaction;
use crate::recovery::locks::LockGroup;
use crate::types::{LogPosition, TransactionId};
use serde::{Deserialize, Serialize};

/// How a transaction is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplicationMode {
    /// Redo the transaction's effects (forward pass).
    Recovery,
    /// Undo effects that may have reached storage (reverse pass).
    ReverseRecovery,
}

/// Storage-side record of how far the log has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    /// Last committed transaction known to storage.
    pub last_committed_tx: TransactionId,
    /// Checksum of that transaction.
    pub checksum: u32,
    /// Position just past the last closed log entry.
    pub last_closed_position: LogPosition,
}

impl TransactionMetadata {
    /// Metadata of a store that never committed anything.
    pub const EMPTY: Self = Self {
        last_committed_tx: TransactionId::new(0),
        checksum: 0,
        last_closed_position: LogPosition::UNSPECIFIED,
    };

    /// Whether the store never committed anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_committed_tx.as_u64() == 0 && !self.last_closed_position.is_specified()
    }
}

impl Default for TransactionMetadata {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// The storage engine being recovered.
///
/// `apply` may be called from several worker threads at once during a
/// parallel forward pass; calls for transactions touching the same entities
/// are serialized through the locks taken in `lock_recovery_commands`.
pub trait StorageEngine: Send + Sync {
    /// Applies (or, in reverse mode, undoes) a committed transaction.
    ///
    /// Must be idempotent: recovery may apply a transaction whose effects
    /// already reached storage.
    ///
    /// # Errors
    ///
    /// Any error aborts recovery.
    fn apply(&self, tx: &CommittedTransaction, mode: ApplicationMode) -> CoreResult<()>;

    /// Locks whatever `tx` will touch before it is applied in parallel.
    ///
    /// Called for one transaction at a time, in log order. The default
    /// locks every entity the transaction's commands name; engines with
    /// coarser or finer lock keys override it.
    ///
    /// # Errors
    ///
    /// Any error aborts recovery.
    fn lock_recovery_commands(
        &self,
        tx: &CommittedTransaction,
        locks: &mut LockGroup,
        mode: ApplicationMode,
    ) -> CoreResult<()> {
        let _ = mode;
        for entity in tx.entities() {
            locks.acquire(entity);
        }
        Ok(())
    }

    /// Discards any effect of a transaction that never completed.
    ///
    /// # Errors
    ///
    /// Any error aborts recovery.
    fn rollback_incomplete(&self, tx: &IncompleteTransaction) -> CoreResult<()> {
        let _ = tx;
        Ok(())
    }

    /// Reads the stored transaction metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    fn metadata(&self) -> CoreResult<TransactionMetadata>;

    /// Records the metadata reached by recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be written.
    fn set_recovered_metadata(&self, metadata: TransactionMetadata) -> CoreResult<()>;

    /// Makes applied changes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> CoreResult<()>;
}
