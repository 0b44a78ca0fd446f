//! Transaction cursors over the log.
//!
//! Both cursors assemble `Start`, `CommandBatch*` and `Commit` entries into
//! [`CommittedTransaction`]s, verifying each transaction's checksum. Rolled
//! back transactions are skipped.

use crate::error::{CoreError, CoreResult};
use crate::log::entry::LogEntry;
use crate::log::files::LogFiles;
use crate::log::reader::{LogEntryReader, PositionedEntry, StreamEnd};
use crate::log::transaction::CommittedTransaction;
use crate::recovery::completeness::{IncompleteTransactionSet, TransactionCompletenessTracker};
use crate::types::LogPosition;
use std::collections::VecDeque;

/// Reads committed transactions oldest first, across segment boundaries.
///
/// Reading stops at the end of the highest segment or at `bound`, whichever
/// comes first. After iteration, [`TransactionCursor::safe_position`] is the
/// point up to which the log was fully understood: just past the last
/// `Commit`, `Rollback` or `Checkpoint` read.
pub struct TransactionCursor {
    files: LogFiles,
    reader: Option<LogEntryReader>,
    /// Versions still to read after the current one.
    pending_versions: VecDeque<u64>,
    bound: Option<LogPosition>,
    tracker: TransactionCompletenessTracker,
    safe_position: LogPosition,
    finished: bool,
}

impl TransactionCursor {
    /// Opens a cursor at `from`, reading no further than `bound`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment holding `from` is missing or its
    /// header is invalid.
    pub fn new(files: LogFiles, from: LogPosition, bound: Option<LogPosition>) -> CoreResult<Self> {
        let pending_versions = files
            .versions()?
            .into_iter()
            .filter(|&v| v > from.segment_version)
            .filter(|&v| bound.map_or(true, |b| v <= b.segment_version))
            .collect();
        Self::open(files, from, bound, pending_versions)
    }

    /// Opens a cursor confined to the segment holding `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is missing or its header is invalid.
    pub fn segment(files: LogFiles, from: LogPosition, bound: Option<LogPosition>) -> CoreResult<Self> {
        Self::open(files, from, bound, VecDeque::new())
    }

    fn open(
        files: LogFiles,
        from: LogPosition,
        bound: Option<LogPosition>,
        pending_versions: VecDeque<u64>,
    ) -> CoreResult<Self> {
        let reader = bounded(
            files.reader(from.segment_version, Some(from.byte_offset))?,
            bound,
        );
        Ok(Self {
            safe_position: reader.entry_position(),
            files,
            reader: Some(reader),
            pending_versions,
            bound,
            tracker: TransactionCompletenessTracker::new(),
            finished: false,
        })
    }

    /// Position just past the last entry that closed a transaction or was
    /// a checkpoint. Everything after it is safe to truncate.
    #[must_use]
    pub const fn safe_position(&self) -> LogPosition {
        self.safe_position
    }

    /// Ends the cursor, returning its position and the transactions still
    /// open at that point.
    #[must_use]
    pub fn finish(self) -> (LogPosition, IncompleteTransactionSet) {
        (self.safe_position, self.tracker.into_incomplete())
    }

    /// Reads the next committed transaction.
    ///
    /// # Errors
    ///
    /// Returns a corruption error for undecodable entries, checksum
    /// mismatches, orphaned entries, a torn entry before the last segment,
    /// or a gap in the segment sequence. The cursor yields nothing after an
    /// error.
    pub fn next_transaction(&mut self) -> CoreResult<Option<CommittedTransaction>> {
        if self.finished {
            return Ok(None);
        }
        let result = self.read_next();
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }

    fn read_next(&mut self) -> CoreResult<Option<CommittedTransaction>> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };

            let Some(positioned) = reader.next_entry()? else {
                if reader.stream_end() == Some(StreamEnd::Truncated) && !self.pending_versions.is_empty() {
                    return Err(CoreError::log_corruption(
                        reader.entry_position(),
                        "incomplete entry before the last log segment",
                    ));
                }
                if !self.advance_segment()? {
                    return Ok(None);
                }
                continue;
            };

            if let Some(tx) = self.accept(positioned)? {
                return Ok(Some(tx));
            }
        }
    }

    fn accept(&mut self, positioned: PositionedEntry) -> CoreResult<Option<CommittedTransaction>> {
        let PositionedEntry {
            position,
            end,
            entry,
        } = positioned;

        match entry {
            LogEntry::Start {
                tx_id, timestamp, ..
            } => {
                self.tracker.start(tx_id, timestamp, position)?;
                Ok(None)
            }

            LogEntry::CommandBatch(batch) => {
                self.tracker.batch(batch, position)?;
                Ok(None)
            }

            LogEntry::Commit {
                tx_id,
                timestamp,
                checksum,
            } => {
                let open = self.tracker.complete(tx_id).ok_or_else(|| {
                    CoreError::log_corruption(position, format!("commit of {tx_id} without a start"))
                })?;

                if !open.batches.is_empty() && !open.last_chunk_seen {
                    return Err(CoreError::log_corruption(
                        position,
                        format!("{tx_id} committed before its final chunk"),
                    ));
                }

                let actual = open.checksum();
                if actual != checksum {
                    return Err(CoreError::ChecksumMismatch {
                        position,
                        expected: checksum,
                        actual,
                    });
                }

                self.safe_position = end;
                Ok(Some(CommittedTransaction {
                    tx_id,
                    start_timestamp: open.start_timestamp,
                    commit_timestamp: timestamp,
                    checksum,
                    batches: open.batches,
                    start_position: open.start_position,
                    end_position: end,
                }))
            }

            LogEntry::Rollback { tx_id, .. } => {
                // Rollback markers appended by recovery may outlive their start.
                if self.tracker.complete(tx_id).is_none() {
                    tracing::debug!(%tx_id, %position, "rollback without a start");
                }
                self.safe_position = end;
                Ok(None)
            }

            LogEntry::Checkpoint { .. } => {
                self.safe_position = end;
                Ok(None)
            }
        }
    }

    /// Moves to the next segment; returns `false` at the end of the log.
    fn advance_segment(&mut self) -> CoreResult<bool> {
        let Some(current) = self.reader.as_ref().map(LogEntryReader::version) else {
            return Ok(false);
        };
        let Some(next) = self.pending_versions.pop_front() else {
            self.reader = None;
            return Ok(false);
        };

        if next != current + 1 {
            return Err(CoreError::log_corruption(
                LogPosition::new(current + 1, 0),
                format!("log segment {} is missing, next is {next}", current + 1),
            ));
        }

        let reader = bounded(self.files.reader(next, None)?, self.bound);
        if self.tracker.is_empty() {
            self.safe_position = reader.entry_position();
        }
        self.reader = Some(reader);
        Ok(true)
    }
}

impl Iterator for TransactionCursor {
    type Item = CoreResult<CommittedTransaction>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_transaction().transpose()
    }
}

fn bounded(reader: LogEntryReader, bound: Option<LogPosition>) -> LogEntryReader {
    match bound {
        Some(b) if b.segment_version == reader.version() => reader.with_limit(b.byte_offset),
        _ => reader,
    }
}

/// Reads committed transactions newest first.
///
/// Segments are visited from the highest down to the one holding `from`;
/// each is read forward and its transactions yielded in reverse. An error
/// in one segment does not stop the others: the transactions read before
/// it are still yielded, and the first error is returned once everything
/// else has been.
pub struct ReversedTransactionCursor {
    files: LogFiles,
    from: LogPosition,
    bound: Option<LogPosition>,
    /// Remaining versions, ascending; popped from the back.
    versions: Vec<u64>,
    /// Transactions of the current segment, oldest first; popped from the back.
    pending: Vec<CommittedTransaction>,
    error: Option<CoreError>,
}

impl ReversedTransactionCursor {
    /// Opens a reversed cursor over `from..bound`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segments cannot be listed.
    pub fn new(files: LogFiles, from: LogPosition, bound: Option<LogPosition>) -> CoreResult<Self> {
        let versions = files
            .versions()?
            .into_iter()
            .filter(|&v| v >= from.segment_version)
            .filter(|&v| bound.map_or(true, |b| v <= b.segment_version))
            .collect();
        Ok(Self {
            files,
            from,
            bound,
            versions,
            pending: Vec::new(),
            error: None,
        })
    }

    /// Reads the next transaction, newest first.
    ///
    /// # Errors
    ///
    /// Returns the first read error once all readable transactions have
    /// been yielded.
    pub fn next_transaction(&mut self) -> CoreResult<Option<CommittedTransaction>> {
        loop {
            if let Some(tx) = self.pending.pop() {
                return Ok(Some(tx));
            }
            let Some(version) = self.versions.pop() else {
                return self.error.take().map_or(Ok(None), Err);
            };
            self.read_segment(version);
        }
    }

    fn read_segment(&mut self, version: u64) {
        let from = if version == self.from.segment_version {
            self.from
        } else {
            LogPosition::new(version, 0)
        };

        let mut cursor = match TransactionCursor::segment(self.files.clone(), from, self.bound) {
            Ok(cursor) => cursor,
            Err(e) => {
                self.record(e);
                return;
            }
        };

        loop {
            match cursor.next_transaction() {
                Ok(Some(tx)) => self.pending.push(tx),
                Ok(None) => break,
                Err(e) => {
                    self.record(e);
                    break;
                }
            }
        }
    }

    fn record(&mut self, error: CoreError) {
        tracing::warn!(%error, "unreadable transactions while reading the log backwards");
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

impl Iterator for ReversedTransactionCursor {
    type Item = CoreResult<CommittedTransaction>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_transaction().transpose()
    }
}
