//! Transactions assembled from log entries.

use crate::log::entry::{Command, CommandBatch};
use crate::types::{LogPosition, TransactionId};
use std::collections::BTreeSet;

/// A committed transaction read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransaction {
    /// Transaction ID.
    pub tx_id: TransactionId,
    /// Timestamp of the `Start` entry.
    pub start_timestamp: u64,
    /// Timestamp of the `Commit` entry.
    pub commit_timestamp: u64,
    /// Checksum carried by the `Commit` entry, already verified.
    pub checksum: u32,
    /// Command batches in chunk order.
    pub batches: Vec<CommandBatch>,
    /// Where the `Start` entry begins.
    pub start_position: LogPosition,
    /// Just past the `Commit` entry.
    pub end_position: LogPosition,
}

impl CommittedTransaction {
    /// All commands in application order.
    pub fn commands(&self) -> impl DoubleEndedIterator<Item = &Command> + '_ {
        self.batches.iter().flat_map(|batch| batch.commands.iter())
    }

    /// Distinct entities touched, in ascending order.
    #[must_use]
    pub fn entities(&self) -> BTreeSet<u64> {
        self.commands().map(|command| command.entity).collect()
    }

    /// Number of commands across all batches.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.commands.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_flatten_batches_in_order() {
        let tx_id = TransactionId::new(1);
        let tx = CommittedTransaction {
            tx_id,
            start_timestamp: 0,
            commit_timestamp: 0,
            checksum: 0,
            batches: vec![
                CommandBatch {
                    tx_id,
                    chunk: 0,
                    is_last: false,
                    commands: vec![Command::create(9, vec![1]), Command::create(3, vec![2])],
                },
                CommandBatch {
                    tx_id,
                    chunk: 1,
                    is_last: true,
                    commands: vec![Command::delete(9, vec![1])],
                },
            ],
            start_position: LogPosition::new(0, 64),
            end_position: LogPosition::new(0, 200),
        };

        let order: Vec<u64> = tx.commands().map(|c| c.entity).collect();
        assert_eq!(order, vec![9, 3, 9]);
        assert_eq!(tx.entities().into_iter().collect::<Vec<_>>(), vec![3, 9]);
        assert_eq!(tx.command_count(), 3);
    }
}
