//! Test fixtures for transaction logs.
//!
//! [`TestLogs`] owns a temporary directory holding a segment store and the
//! writer appending to it, plus helpers to run recovery over it.

use crate::storage::RecordingStorageEngine;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tidelog_core::recovery::{LogTailState, RecoveryCancellation};
use tidelog_core::{
    Command, CommandBatch, CoreResult, LogConfig, LogEntry, LogFiles, LogPosition, LogWriter,
    Recovery, RecoveryConfig, RecoveryContext, RecoveryOutcome, StoreId, TransactionId,
    DEFAULT_ARCHIVE_DIR_NAME,
};
use tidelog_storage::{FileSegmentStore, InMemorySegmentStore, SegmentStore, StorageBackend};

/// Transaction logs in a temporary directory with automatic cleanup.
pub struct TestLogs {
    dir: TempDir,
    store: Arc<dyn SegmentStore>,
    files: LogFiles,
    log_config: LogConfig,
    writer: Option<LogWriter>,
}

impl TestLogs {
    /// Creates file-backed logs.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileSegmentStore::open(dir.path()).expect("Failed to open segment store");
        Self::with_store(dir, Arc::new(store))
    }

    /// Creates logs held in memory; archives still go to a temp directory.
    pub fn memory() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        Self::with_store(dir, Arc::new(InMemorySegmentStore::new()))
    }

    fn with_store(dir: TempDir, store: Arc<dyn SegmentStore>) -> Self {
        Self {
            files: LogFiles::new(Arc::clone(&store), StoreId::random()),
            dir,
            store,
            log_config: LogConfig::default(),
            writer: None,
        }
    }

    /// Sets the writer configuration, e.g. a small rotation threshold.
    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// The log directory.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// The segment store.
    pub fn store(&self) -> &Arc<dyn SegmentStore> {
        &self.store
    }

    /// Log files of this store.
    pub fn files(&self) -> LogFiles {
        self.files.clone()
    }

    /// The writer, creating segment 0 or opening the highest segment first.
    pub fn writer(&mut self) -> &mut LogWriter {
        let files = &self.files;
        let log_config = self.log_config;
        self.writer.get_or_insert_with(|| {
            let existing = files.highest_version().expect("Failed to list segments");
            match existing {
                Some(_) => LogWriter::open(files.clone(), log_config),
                None => LogWriter::create(files.clone(), 0, log_config),
            }
            .expect("Failed to open log writer")
        })
    }

    /// Drops the writer, e.g. after something else rewrote the log.
    pub fn close_writer(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            writer.sync().expect("Failed to sync log writer");
        }
    }

    /// Commits a transaction made of one batch of `commands`.
    ///
    /// Returns its start position and the position after its commit.
    pub fn commit(&mut self, tx: u64, commands: Vec<Command>) -> (LogPosition, LogPosition) {
        let tx_id = TransactionId::new(tx);
        self.writer()
            .append_transaction(tx_id, &[CommandBatch::single(tx_id, commands)])
            .expect("Failed to append transaction")
    }

    /// Commits a transaction split into one batch per command.
    pub fn commit_chunked(&mut self, tx: u64, commands: Vec<Command>) -> (LogPosition, LogPosition) {
        let tx_id = TransactionId::new(tx);
        let count = commands.len();
        let batches: Vec<CommandBatch> = commands
            .into_iter()
            .enumerate()
            .map(|(i, command)| CommandBatch {
                tx_id,
                chunk: i as u32,
                is_last: i + 1 == count,
                commands: vec![command],
            })
            .collect();
        self.writer()
            .append_transaction(tx_id, &batches)
            .expect("Failed to append transaction")
    }

    /// Commits a single write of `after` to `entity`.
    pub fn put(
        &mut self,
        tx: u64,
        entity: u64,
        before: Option<&[u8]>,
        after: &[u8],
    ) -> (LogPosition, LogPosition) {
        let command = match before {
            Some(before) => Command::update(entity, before, after),
            None => Command::create(entity, after),
        };
        self.commit(tx, vec![command])
    }

    /// Writes a `Start` and the given batch without committing.
    pub fn begin(&mut self, tx: u64, commands: Vec<Command>, is_last: bool) -> LogPosition {
        let tx_id = TransactionId::new(tx);
        let writer = self.writer();
        let start = writer
            .append(&LogEntry::start(tx_id, tidelog_core::now_millis()))
            .expect("Failed to append start");
        if !commands.is_empty() {
            writer
                .append(&LogEntry::CommandBatch(CommandBatch {
                    tx_id,
                    chunk: 0,
                    is_last,
                    commands,
                }))
                .expect("Failed to append batch");
        }
        start
    }

    /// Appends a checkpoint whose resume position is where it is written.
    pub fn checkpoint(&mut self, last_tx: u64, reason: &str) -> LogPosition {
        self.writer()
            .append_checkpoint(TransactionId::new(last_tx), reason)
            .expect("Failed to append checkpoint")
    }

    /// Starts the next segment.
    pub fn rotate(&mut self) -> u64 {
        self.writer().rotate().expect("Failed to rotate log")
    }

    /// Position the next entry will be written at.
    pub fn position(&mut self) -> LogPosition {
        self.writer().position().expect("Failed to read log position")
    }

    /// Existing segment versions.
    pub fn versions(&self) -> Vec<u64> {
        self.files.versions().expect("Failed to list segments")
    }

    /// Size of segment `version`.
    pub fn segment_size(&self, version: u64) -> u64 {
        self.store.segment_size(version).expect("Failed to read segment size")
    }

    /// Full contents of segment `version`.
    pub fn segment_bytes(&self, version: u64) -> Vec<u8> {
        self.store
            .open(version)
            .and_then(|segment| segment.read_from(0))
            .expect("Failed to read segment")
    }

    /// Contents of every segment, by version.
    pub fn snapshot(&self) -> BTreeMap<u64, Vec<u8>> {
        self.versions()
            .into_iter()
            .map(|version| (version, self.segment_bytes(version)))
            .collect()
    }

    /// Directory truncated log content is archived in.
    pub fn archive_dir(&self) -> PathBuf {
        self.dir().join(DEFAULT_ARCHIVE_DIR_NAME)
    }

    /// Archives written by recovery, sorted by name.
    pub fn archives(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(self.archive_dir()) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .map(|entry| entry.expect("Failed to read archive directory").path())
            .collect();
        paths.sort();
        paths
    }

    /// A recovery context over these logs.
    pub fn context(&self, storage: &Arc<RecordingStorageEngine>, config: RecoveryConfig) -> RecoveryContext {
        RecoveryContext::new(self.files(), storage.clone(), self.dir())
            .with_config(config)
            .with_log_config(self.log_config)
    }

    /// Scans the log tail.
    pub fn tail_state(&self, config: RecoveryConfig) -> CoreResult<LogTailState> {
        Recovery::new(self.context(&Arc::new(RecordingStorageEngine::new()), config)).tail_state()
    }

    /// Runs recovery into `storage`, dropping the writer first.
    pub fn recover(
        &mut self,
        storage: &Arc<RecordingStorageEngine>,
        config: RecoveryConfig,
    ) -> CoreResult<RecoveryOutcome> {
        self.close_writer();
        Recovery::new(self.context(storage, config)).run()
    }

    /// Runs recovery that is canceled before it starts replaying.
    pub fn recover_canceled(
        &mut self,
        storage: &Arc<RecordingStorageEngine>,
        config: RecoveryConfig,
    ) -> CoreResult<RecoveryOutcome> {
        self.close_writer();
        let cancellation = Arc::new(RecoveryCancellation::new());
        cancellation.cancel();
        Recovery::new(self.context(storage, config).with_cancellation(cancellation)).run()
    }
}

impl Default for TestLogs {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TestLogs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestLogs")
            .field("dir", &self.dir.path())
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

/// Runs `f` with fresh file-backed logs.
pub fn with_test_logs<F, R>(f: F) -> R
where
    F: FnOnce(&mut TestLogs) -> R,
{
    let mut logs = TestLogs::new();
    f(&mut logs)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Segment 0 with transactions 1..=9 then a rotation; segment 1 with a
    /// checkpoint at `(1, 64)` and one at `(1, 128)`; transactions 10..=15
    /// after it, rotating into segment 2 after transaction 12.
    ///
    /// Every transaction `n` writes `[n]` to entity `n % 4`.
    pub fn checkpoint_in_middle_segment() -> TestLogs {
        let mut logs = TestLogs::new();
        for tx in 1..=9 {
            logs.put(tx, tx % 4, None, &[tx as u8]);
        }
        logs.rotate();
        // 9 bytes of framing, 36 of fixed payload and a 19 byte reason.
        let first = logs.checkpoint(9, "Checkpoint rotation");
        assert_eq!(first, LogPosition::new(1, 64));
        let second = logs.checkpoint(9, "Checkpoint periodic");
        assert_eq!(second, LogPosition::new(1, 128));
        for tx in 10..=15 {
            logs.put(tx, tx % 4, None, &[tx as u8]);
            if tx == 12 {
                logs.rotate();
            }
        }
        logs.close_writer();
        logs
    }
}
