//! Log segment writer.

use crate::config::LogConfig;
use crate::error::{CoreError, CoreResult};
use crate::log::entry::{CommandBatch, LogEntry, TransactionChecksum};
use crate::log::files::LogFiles;
use crate::types::{now_millis, LogPosition, TransactionId};
use std::collections::BTreeSet;
use tidelog_storage::StorageBackend;

/// Appends entries to the highest log segment.
///
/// The writer rotates to a new segment once the current one passes
/// [`LogConfig::rotation_threshold`], but only between transactions, so a
/// transaction's entries always live in a single segment.
pub struct LogWriter {
    files: LogFiles,
    config: LogConfig,
    version: u64,
    segment: Box<dyn StorageBackend>,
    /// Transactions with a `Start` but no `Commit`/`Rollback` yet.
    open_transactions: BTreeSet<TransactionId>,
}

impl LogWriter {
    /// Creates segment `version` and positions the writer after its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment exists or cannot be written.
    pub fn create(files: LogFiles, version: u64, config: LogConfig) -> CoreResult<Self> {
        let segment = files.create_segment(version)?;
        Ok(Self {
            files,
            config,
            version,
            segment,
            open_transactions: BTreeSet::new(),
        })
    }

    /// Opens the highest existing segment for appending.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no segments or the highest one has an
    /// invalid header.
    pub fn open(files: LogFiles, config: LogConfig) -> CoreResult<Self> {
        let version = files
            .highest_version()?
            .ok_or_else(|| CoreError::invalid_argument("no log segment to append to"))?;
        let segment = files.open_segment(version)?;
        Ok(Self {
            files,
            config,
            version,
            segment,
            open_transactions: BTreeSet::new(),
        })
    }

    /// Version of the segment being written.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Position the next entry will be written at, before any rotation.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment size cannot be read.
    pub fn position(&self) -> CoreResult<LogPosition> {
        Ok(LogPosition::new(self.version, self.segment.size()?))
    }

    /// Appends one entry and returns the position it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be encoded or written.
    pub fn append(&mut self, entry: &LogEntry) -> CoreResult<LogPosition> {
        self.rotate_if_needed()?;

        let frame = entry.encode()?;
        let offset = self.segment.append(&frame)?;

        match entry {
            LogEntry::Start { tx_id, .. } => {
                self.open_transactions.insert(*tx_id);
            }
            LogEntry::Commit { tx_id, .. } | LogEntry::Rollback { tx_id, .. } => {
                self.open_transactions.remove(tx_id);
            }
            LogEntry::CommandBatch(_) | LogEntry::Checkpoint { .. } => {}
        }

        if self.config.sync_on_write {
            self.segment.flush()?;
        }

        Ok(LogPosition::new(self.version, offset))
    }

    /// Appends a complete committed transaction.
    ///
    /// Returns the position of its `Start` entry and the position just past
    /// its `Commit` entry.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry cannot be written.
    pub fn append_transaction(
        &mut self,
        tx_id: TransactionId,
        batches: &[CommandBatch],
    ) -> CoreResult<(LogPosition, LogPosition)> {
        let start = self.append(&LogEntry::start(tx_id, now_millis()))?;
        for batch in batches {
            self.append(&LogEntry::CommandBatch(batch.clone()))?;
        }
        self.append(&LogEntry::Commit {
            tx_id,
            timestamp: now_millis(),
            checksum: TransactionChecksum::of(batches)?,
        })?;
        Ok((start, self.position()?))
    }

    /// Appends a checkpoint whose resume position is where it is written.
    ///
    /// Returns that position.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is open or the entry cannot be
    /// written.
    pub fn append_checkpoint(
        &mut self,
        last_tx_id: TransactionId,
        reason: impl Into<String>,
    ) -> CoreResult<LogPosition> {
        if !self.open_transactions.is_empty() {
            return Err(CoreError::invalid_argument(format!(
                "cannot checkpoint with {} open transactions",
                self.open_transactions.len()
            )));
        }

        self.rotate_if_needed()?;
        let position = self.position()?;
        self.append(&LogEntry::Checkpoint {
            position,
            last_tx_id,
            timestamp: now_millis(),
            reason: reason.into(),
        })?;
        Ok(position)
    }

    /// Syncs the current segment and starts the next version.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is open or the new segment cannot
    /// be created.
    pub fn rotate(&mut self) -> CoreResult<u64> {
        if !self.open_transactions.is_empty() {
            return Err(CoreError::invalid_argument(
                "cannot rotate the log inside a transaction",
            ));
        }

        self.segment.sync()?;
        let next = self.version + 1;
        self.segment = self.files.create_segment(next)?;
        self.version = next;
        tracing::info!(version = next, "rotated transaction log");
        Ok(next)
    }

    fn rotate_if_needed(&mut self) -> CoreResult<()> {
        if self.open_transactions.is_empty() && self.segment.size()? >= self.config.rotation_threshold
        {
            self.rotate()?;
        }
        Ok(())
    }

    /// Flushes appended entries to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.segment.flush()?;
        Ok(())
    }

    /// Syncs appended entries to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.segment.sync()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::entry::Command;
    use crate::log::reader::PositionedEntry;
    use crate::types::StoreId;
    use std::sync::Arc;
    use tidelog_storage::InMemorySegmentStore;

    fn files() -> LogFiles {
        LogFiles::new(Arc::new(InMemorySegmentStore::new()), StoreId::random())
    }

    fn batch(tx: u64) -> CommandBatch {
        CommandBatch::single(TransactionId::new(tx), vec![Command::create(tx, vec![1, 2, 3])])
    }

    fn read_all(files: &LogFiles, version: u64) -> Vec<PositionedEntry> {
        files
            .reader(version, None)
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap()
    }

    #[test]
    fn transaction_written_and_read_back() {
        let files = files();
        let mut writer = LogWriter::create(files.clone(), 0, LogConfig::default()).unwrap();

        let (start, end) = writer
            .append_transaction(TransactionId::new(1), &[batch(1)])
            .unwrap();
        assert_eq!(start, LogPosition::new(0, 64));

        let entries = read_all(&files, 0);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].end, end);
        match &entries[2].entry {
            LogEntry::Commit { checksum, .. } => {
                assert_eq!(*checksum, TransactionChecksum::of([&batch(1)]).unwrap());
            }
            other => panic!("expected commit, got {other:?}"),
        }
    }

    #[test]
    fn rotation_happens_between_transactions() {
        let files = files();
        let config = LogConfig::default().rotation_threshold(100);
        let mut writer = LogWriter::create(files.clone(), 0, config).unwrap();

        let (_, first_end) = writer
            .append_transaction(TransactionId::new(1), &[batch(1)])
            .unwrap();
        assert_eq!(first_end.segment_version, 0);
        assert!(first_end.byte_offset > 100);

        let (second_start, _) = writer
            .append_transaction(TransactionId::new(2), &[batch(2)])
            .unwrap();
        assert_eq!(second_start, LogPosition::new(1, 64));
        assert_eq!(files.versions().unwrap(), vec![0, 1]);
    }

    #[test]
    fn rotate_refuses_open_transaction() {
        let mut writer = LogWriter::create(files(), 0, LogConfig::default()).unwrap();
        writer
            .append(&LogEntry::start(TransactionId::new(1), 0))
            .unwrap();

        assert!(writer.rotate().is_err());
        assert!(writer.append_checkpoint(TransactionId::new(0), "test").is_err());
    }

    #[test]
    fn checkpoint_resumes_at_its_own_position() {
        let files = files();
        let mut writer = LogWriter::create(files.clone(), 0, LogConfig::default()).unwrap();
        writer
            .append_transaction(TransactionId::new(1), &[batch(1)])
            .unwrap();
        let at = writer.append_checkpoint(TransactionId::new(1), "test").unwrap();

        let entries = read_all(&files, 0);
        let last = entries.last().unwrap();
        assert_eq!(last.position, at);
        assert!(matches!(&last.entry, LogEntry::Checkpoint { position, .. } if *position == at));
    }

    #[test]
    fn open_appends_to_highest_segment() {
        let files = files();
        {
            let mut writer = LogWriter::create(files.clone(), 0, LogConfig::default()).unwrap();
            writer.rotate().unwrap();
        }

        let mut writer = LogWriter::open(files.clone(), LogConfig::default()).unwrap();
        assert_eq!(writer.version(), 1);
        let at = writer
            .append(&LogEntry::start(TransactionId::new(5), 0))
            .unwrap();
        assert_eq!(at, LogPosition::new(1, 64));
    }
}
