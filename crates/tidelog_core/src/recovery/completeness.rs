//! Tracking of transactions that started but never finished.
//!
//! A transaction may be written as several command batches ("chunks"),
//! interleaved with other transactions. The tracker follows each one from
//! its `Start` until its `Commit` or `Rollback`; whatever is still open when
//! the readable log ends must be rolled back rather than replayed.

use crate::error::{CoreError, CoreResult};
use crate::log::entry::{CommandBatch, TransactionChecksum};
use crate::types::{LogPosition, TransactionId};
use std::collections::BTreeMap;

/// A transaction observed between its `Start` and its outcome.
#[derive(Clone)]
pub struct OpenTransaction {
    /// Where the `Start` entry begins.
    pub start_position: LogPosition,
    /// Timestamp of the `Start` entry.
    pub start_timestamp: u64,
    /// Batches seen so far, in chunk order.
    pub batches: Vec<CommandBatch>,
    /// Whether the batch flagged `is_last` has been seen.
    pub last_chunk_seen: bool,
    checksum: TransactionChecksum,
}

impl OpenTransaction {
    /// Checksum of the batches seen so far.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.checksum.clone().finish()
    }
}

impl std::fmt::Debug for OpenTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenTransaction")
            .field("start_position", &self.start_position)
            .field("batches", &self.batches.len())
            .field("last_chunk_seen", &self.last_chunk_seen)
            .finish()
    }
}

/// Follows transactions from `Start` to outcome while the log is read.
#[derive(Debug, Default)]
pub struct TransactionCompletenessTracker {
    open: BTreeMap<TransactionId, OpenTransaction>,
}

impl TransactionCompletenessTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a `Start` entry.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the transaction is already open.
    pub fn start(
        &mut self,
        tx_id: TransactionId,
        timestamp: u64,
        position: LogPosition,
    ) -> CoreResult<()> {
        if self.open.contains_key(&tx_id) {
            return Err(CoreError::log_corruption(
                position,
                format!("{tx_id} started twice"),
            ));
        }
        self.open.insert(
            tx_id,
            OpenTransaction {
                start_position: position,
                start_timestamp: timestamp,
                batches: Vec::new(),
                last_chunk_seen: false,
                checksum: TransactionChecksum::new(),
            },
        );
        Ok(())
    }

    /// Records a command batch.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the transaction never started, the
    /// chunk is out of sequence, or it follows the final chunk.
    pub fn batch(&mut self, batch: CommandBatch, position: LogPosition) -> CoreResult<()> {
        let tx_id = batch.tx_id;
        let open = self.open.get_mut(&tx_id).ok_or_else(|| {
            CoreError::log_corruption(position, format!("command batch for {tx_id} without a start"))
        })?;

        if open.last_chunk_seen {
            return Err(CoreError::log_corruption(
                position,
                format!("chunk {} of {tx_id} follows its final chunk", batch.chunk),
            ));
        }
        let expected = open.batches.len();
        if batch.chunk as usize != expected {
            return Err(CoreError::log_corruption(
                position,
                format!("chunk {} of {tx_id} out of sequence, expected {expected}", batch.chunk),
            ));
        }

        open.checksum.update(&batch)?;
        open.last_chunk_seen = batch.is_last;
        open.batches.push(batch);
        Ok(())
    }

    /// Removes a transaction whose outcome was read.
    pub fn complete(&mut self, tx_id: TransactionId) -> Option<OpenTransaction> {
        self.open.remove(&tx_id)
    }

    /// Whether no transaction is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Number of open transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// Ends tracking; everything still open is incomplete.
    #[must_use]
    pub fn into_incomplete(self) -> IncompleteTransactionSet {
        IncompleteTransactionSet {
            transactions: self
                .open
                .into_iter()
                .map(|(tx_id, open)| IncompleteTransaction {
                    tx_id,
                    start_position: open.start_position,
                    batches: open.batches,
                    last_chunk_seen: open.last_chunk_seen,
                    checksum: open.checksum.finish(),
                })
                .collect(),
        }
    }
}

/// A transaction whose outcome is not in the readable log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteTransaction {
    /// Transaction ID.
    pub tx_id: TransactionId,
    /// Where its `Start` entry begins.
    pub start_position: LogPosition,
    /// Batches that were written.
    pub batches: Vec<CommandBatch>,
    /// Whether its final chunk was written.
    pub last_chunk_seen: bool,
    /// Checksum of the written batches.
    pub checksum: u32,
}

/// Transactions to roll back at the end of recovery, in id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncompleteTransactionSet {
    transactions: Vec<IncompleteTransaction>,
}

impl IncompleteTransactionSet {
    /// Whether every transaction finished.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Number of incomplete transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether `tx_id` is incomplete.
    #[must_use]
    pub fn contains(&self, tx_id: TransactionId) -> bool {
        self.transactions.iter().any(|tx| tx.tx_id == tx_id)
    }

    /// Incomplete transaction ids.
    #[must_use]
    pub fn tx_ids(&self) -> Vec<TransactionId> {
        self.transactions.iter().map(|tx| tx.tx_id).collect()
    }

    /// Iterates the incomplete transactions.
    pub fn iter(&self) -> std::slice::Iter<'_, IncompleteTransaction> {
        self.transactions.iter()
    }
}

impl IntoIterator for IncompleteTransactionSet {
    type Item = IncompleteTransaction;
    type IntoIter = std::vec::IntoIter<IncompleteTransaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.transactions.into_iter()
    }
}
