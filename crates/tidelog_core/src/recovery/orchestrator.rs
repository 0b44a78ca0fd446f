//! The recovery run.
//!
//! ```text
//! NotRequired
//!     ^
//!     | tail is clean
//! scan tail -> ReversePass -> ForwardPass -> Truncating -> Complete
//!                   |              |              |
//!                   +--------------+--------------+-> Failed
//! ```
//!
//! The reverse pass undoes, newest first, every transaction after the
//! recovery position; the forward pass then replays them oldest first.
//! Transactions that never completed are rolled back, the unreadable part
//! of the log is archived and removed, and a checkpoint marks the log as
//! recovered.

use crate::availability::AvailabilityGuard;
use crate::config::{LogConfig, RecoveryConfig};
use crate::error::{CoreError, CoreResult};
use crate::log::cursor::{ReversedTransactionCursor, TransactionCursor};
use crate::log::entry::LogEntry;
use crate::log::files::LogFiles;
use crate::log::writer::LogWriter;
use crate::recovery::completeness::IncompleteTransactionSet;
use crate::recovery::monitor::{
    LogProgressReporter, LoggingRecoveryMonitor, ProgressReporter, RecoveryCancellation,
    RecoveryMonitor,
};
use crate::recovery::parallel::ParallelRecoveryApplier;
use crate::recovery::start::{resolve_recovery_start, RecoveryStartInformation};
use crate::recovery::storage::{ApplicationMode, StorageEngine, TransactionMetadata};
use crate::recovery::tail::{LogTailScanner, LogTailState};
use crate::recovery::truncator::CorruptedLogsTruncator;
use crate::types::{now_millis, LogPosition, TransactionId, INITIAL_LOG_VERSION};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// Reason recorded in the checkpoint written after recovery.
pub const RECOVERY_COMPLETED_REASON: &str = "Recovery completed.";

/// Where a recovery run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryState {
    /// The run has not started.
    Idle,
    /// The log was consistent; nothing was replayed.
    NotRequired,
    /// Undoing transactions newest first.
    ReversePass,
    /// Replaying transactions oldest first.
    ForwardPass,
    /// Rolling back, truncating and checkpointing the log.
    Truncating,
    /// Recovery finished.
    Complete,
    /// Recovery failed.
    Failed,
}

/// What a recovery run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// Whether anything was replayed or repaired.
    pub recovery_performed: bool,
    /// Position replay started from.
    pub recovery_position: Option<LogPosition>,
    /// Transactions undone by the reverse pass.
    pub reversed_transactions: u64,
    /// Transactions replayed by the forward pass.
    pub recovered_transactions: u64,
    /// Last transaction replayed.
    pub last_recovered_tx: Option<TransactionId>,
    /// Incomplete transactions rolled back.
    pub rolled_back: Vec<TransactionId>,
    /// Where the log was cut, if anything was removed.
    pub truncated_at: Option<LogPosition>,
    /// Archive holding the removed bytes.
    pub archive: Option<PathBuf>,
    /// Position of the checkpoint written by recovery.
    pub checkpoint_position: Option<LogPosition>,
}

/// Everything one recovery run needs.
pub struct RecoveryContext {
    files: LogFiles,
    storage: Arc<dyn StorageEngine>,
    log_dir: PathBuf,
    config: RecoveryConfig,
    log_config: LogConfig,
    monitor: Arc<dyn RecoveryMonitor>,
    progress: Arc<dyn ProgressReporter>,
    cancellation: Arc<RecoveryCancellation>,
    availability: Arc<AvailabilityGuard>,
}

impl RecoveryContext {
    /// Creates a context with default configuration.
    ///
    /// Truncated log content is archived under `log_dir`.
    pub fn new(files: LogFiles, storage: Arc<dyn StorageEngine>, log_dir: impl Into<PathBuf>) -> Self {
        let config = RecoveryConfig::default();
        Self {
            progress: Arc::new(LogProgressReporter::new(config.progress_report_step_percent)),
            files,
            storage,
            log_dir: log_dir.into(),
            config,
            log_config: LogConfig::default(),
            monitor: Arc::new(LoggingRecoveryMonitor),
            cancellation: Arc::new(RecoveryCancellation::new()),
            availability: AvailabilityGuard::new(),
        }
    }

    /// Replaces the recovery configuration.
    #[must_use]
    pub fn with_config(mut self, config: RecoveryConfig) -> Self {
        self.progress = Arc::new(LogProgressReporter::new(config.progress_report_step_percent));
        self.config = config;
        self
    }

    /// Replaces the configuration of the log writer used by recovery.
    #[must_use]
    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// Replaces the monitor.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<dyn RecoveryMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Replaces the progress reporter.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Uses `cancellation` to stop the run.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Arc<RecoveryCancellation>) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Uses `availability` to block the database while the log is rewritten.
    #[must_use]
    pub fn with_availability(mut self, availability: Arc<AvailabilityGuard>) -> Self {
        self.availability = availability;
        self
    }

    /// The recovery configuration.
    #[must_use]
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Directory truncated log content is archived in.
    #[must_use]
    pub fn archive_dir(&self) -> PathBuf {
        self.log_dir.join(&self.config.archive_dir_name)
    }
}

impl std::fmt::Debug for RecoveryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryContext")
            .field("files", &self.files)
            .field("log_dir", &self.log_dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct ForwardResult {
    applied: u64,
    last: Option<(TransactionId, u32)>,
    position: LogPosition,
    incomplete: IncompleteTransactionSet,
}

/// One recovery run over a store's log.
#[derive(Debug)]
pub struct Recovery {
    context: RecoveryContext,
    state: Mutex<RecoveryState>,
}

impl Recovery {
    /// Prepares a run; nothing is read until [`Self::run`].
    #[must_use]
    pub fn new(context: RecoveryContext) -> Self {
        Self {
            context,
            state: Mutex::new(RecoveryState::Idle),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RecoveryState {
        *self.state.lock()
    }

    /// Scans the tail without recovering.
    ///
    /// # Errors
    ///
    /// Returns the scanner's errors.
    pub fn tail_state(&self) -> CoreResult<LogTailState> {
        LogTailScanner::new(self.context.files.clone(), self.context.config.fail_on_corrupted_logs)
            .tail_state()
            .cloned()
    }

    /// Recovers the store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnableToRecover`] for corruption when failing
    /// on it, [`CoreError::RecoveryCanceled`] if canceled, and any storage,
    /// configuration or I/O error. Nothing is truncated after an error.
    pub fn run(&self) -> CoreResult<RecoveryOutcome> {
        match self.perform() {
            Ok(outcome) => {
                self.context.monitor.recovery_completed(&outcome);
                Ok(outcome)
            }
            Err(e) => {
                self.transition(RecoveryState::Failed);
                self.context.monitor.recovery_failed(&e);
                Err(e)
            }
        }
    }

    fn transition(&self, state: RecoveryState) {
        *self.state.lock() = state;
        self.context.monitor.state_changed(state);
    }

    fn perform(&self) -> CoreResult<RecoveryOutcome> {
        let ctx = &self.context;
        let scanner = LogTailScanner::new(ctx.files.clone(), ctx.config.fail_on_corrupted_logs);
        let tail = scanner.tail_state()?;
        let start = resolve_recovery_start(tail)?;

        if start.missing_logs {
            return self.recover_missing_logs();
        }
        if !start.is_recovery_required() {
            self.transition(RecoveryState::NotRequired);
            ctx.monitor.no_recovery_required();
            return Ok(RecoveryOutcome::default());
        }

        let from = start.recovery_position;
        let bound = tail.corruption_position;
        ctx.monitor.recovery_required(from);
        tracing::info!(
            %from,
            transactions = tail.transactions_after_checkpoint,
            first_tx = ?start.first_tx_id_after_checkpoint,
            corrupted = tail.corrupted,
            "starting recovery"
        );
        ctx.progress.start(2 * tail.transactions_after_checkpoint);

        self.transition(RecoveryState::ReversePass);
        let reversed = self.reverse_pass(from, bound)?;

        self.transition(RecoveryState::ForwardPass);
        let forward = self.forward_pass(from, bound)?;

        self.transition(RecoveryState::Truncating);
        let mut outcome = self.finish_log(&start, forward)?;
        outcome.reversed_transactions = reversed;
        outcome.recovery_position = Some(from);

        ctx.progress.completed();
        self.transition(RecoveryState::Complete);
        Ok(outcome)
    }

    fn reverse_pass(&self, from: LogPosition, bound: Option<LogPosition>) -> CoreResult<u64> {
        let ctx = &self.context;
        let mut cursor = ReversedTransactionCursor::new(ctx.files.clone(), from, bound)?;
        let mut reversed = 0;

        loop {
            ctx.cancellation.check_if_canceled()?;
            match cursor.next_transaction() {
                Ok(Some(tx)) => {
                    ctx.storage.apply(&tx, ApplicationMode::ReverseRecovery)?;
                    ctx.monitor.transaction_recovered(tx.tx_id, ApplicationMode::ReverseRecovery);
                    ctx.progress.add(1);
                    reversed += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    self.tolerate_read_failure(e)?;
                    break;
                }
            }
        }

        tracing::debug!(reversed, "reverse recovery pass finished");
        Ok(reversed)
    }

    fn forward_pass(&self, from: LogPosition, bound: Option<LogPosition>) -> CoreResult<ForwardResult> {
        let ctx = &self.context;
        let mut cursor = TransactionCursor::new(ctx.files.clone(), from, bound)?;
        let mut applier = if ctx.config.parallel_recovery {
            Some(ParallelRecoveryApplier::start(
                Arc::clone(&ctx.storage),
                ApplicationMode::Recovery,
                ctx.config.parallel_workers,
                ctx.config.parallel_close_timeout,
                Arc::clone(&ctx.monitor),
                Arc::clone(&ctx.progress),
            )?)
        } else {
            None
        };

        let mut applied = 0;
        let mut last = None;
        let failure = loop {
            if let Err(e) = ctx.cancellation.check_if_canceled() {
                break Some(e);
            }
            let tx = match cursor.next_transaction() {
                Ok(Some(tx)) => tx,
                Ok(None) => break None,
                Err(e) => break Some(e),
            };

            let (tx_id, checksum) = (tx.tx_id, tx.checksum);
            let result = match applier.as_mut() {
                Some(applier) => applier.submit(tx),
                None => ctx.storage.apply(&tx, ApplicationMode::Recovery).map(|()| {
                    ctx.monitor.transaction_recovered(tx_id, ApplicationMode::Recovery);
                    ctx.progress.add(1);
                }),
            };
            if let Err(e) = result {
                break Some(e);
            }
            applied += 1;
            last = Some((tx_id, checksum));
        };

        // Worker errors take precedence; they are what stopped submission.
        if let Some(applier) = applier {
            applier.close()?;
        }
        if let Some(e) = failure {
            self.tolerate_read_failure(e)?;
        }

        let (position, incomplete) = cursor.finish();
        tracing::debug!(applied, %position, incomplete = incomplete.len(), "forward recovery pass finished");
        Ok(ForwardResult {
            applied,
            last,
            position,
            incomplete,
        })
    }

    /// Decides whether a read error ends the pass or the run.
    fn tolerate_read_failure(&self, error: CoreError) -> CoreResult<()> {
        if !error.is_corruption() {
            return Err(error);
        }
        if self.context.config.fail_on_corrupted_logs {
            return Err(CoreError::unable_to_recover(error));
        }
        tracing::warn!(%error, "stopping recovery at unreadable transaction");
        Ok(())
    }

    fn finish_log(
        &self,
        start: &RecoveryStartInformation,
        forward: ForwardResult,
    ) -> CoreResult<RecoveryOutcome> {
        let ctx = &self.context;
        let mut outcome = RecoveryOutcome {
            recovery_performed: true,
            recovered_transactions: forward.applied,
            last_recovered_tx: forward.last.map(|(tx_id, _)| tx_id),
            ..RecoveryOutcome::default()
        };

        for tx in forward.incomplete.iter() {
            ctx.storage.rollback_incomplete(tx)?;
            ctx.monitor.incomplete_transaction_rolled_back(tx.tx_id);
            outcome.rolled_back.push(tx.tx_id);
        }
        ctx.storage.flush()?;

        let metadata = ctx.storage.metadata()?;
        let (last_tx, checksum) = forward.last.unwrap_or_else(|| {
            let checkpointed = start.checkpoint.as_ref().map(|c| c.last_tx_id);
            match checkpointed {
                Some(tx_id) if tx_id > metadata.last_committed_tx => (tx_id, 0),
                _ => (metadata.last_committed_tx, metadata.checksum),
            }
        });

        let _unavailable = ctx.availability.unavailable("recovery is rewriting the transaction log");

        let truncator = CorruptedLogsTruncator::new(ctx.files.clone(), ctx.archive_dir());
        let archive = truncator.truncate(forward.position)?;
        if archive.is_some() {
            ctx.monitor.logs_truncated(forward.position, archive.as_deref());
            outcome.truncated_at = Some(forward.position);
        }
        outcome.archive = archive;

        let mut writer = LogWriter::open(ctx.files.clone(), ctx.log_config)?;
        for tx in forward.incomplete.iter() {
            if tx.start_position < forward.position {
                writer.append(&LogEntry::Rollback {
                    tx_id: tx.tx_id,
                    timestamp: now_millis(),
                    checksum: tx.checksum,
                })?;
            }
        }
        let checkpoint = writer.append_checkpoint(last_tx, RECOVERY_COMPLETED_REASON)?;
        writer.sync()?;
        outcome.checkpoint_position = Some(checkpoint);

        ctx.storage.set_recovered_metadata(TransactionMetadata {
            last_committed_tx: last_tx,
            checksum,
            last_closed_position: writer.position()?,
        })?;
        ctx.storage.flush()?;

        tracing::info!(
            recovered = outcome.recovered_transactions,
            rolled_back = outcome.rolled_back.len(),
            %checkpoint,
            "recovery checkpoint written"
        );
        Ok(outcome)
    }

    fn recover_missing_logs(&self) -> CoreResult<RecoveryOutcome> {
        let ctx = &self.context;
        let metadata = ctx.storage.metadata()?;

        if metadata.is_empty() {
            LogWriter::create(ctx.files.clone(), INITIAL_LOG_VERSION, ctx.log_config)?.sync()?;
            tracing::info!("created initial transaction log");
            self.transition(RecoveryState::NotRequired);
            ctx.monitor.no_recovery_required();
            return Ok(RecoveryOutcome::default());
        }

        if ctx.config.fail_on_missing_logs {
            return Err(CoreError::LogsMissing);
        }

        let version = if metadata.last_closed_position.is_specified() {
            metadata.last_closed_position.segment_version
        } else {
            INITIAL_LOG_VERSION
        };
        tracing::warn!(
            version,
            last_tx = %metadata.last_committed_tx,
            "transaction logs are missing, starting a new log"
        );

        self.transition(RecoveryState::Truncating);
        let _unavailable = ctx.availability.unavailable("recovery is recreating the transaction log");
        let mut writer = LogWriter::create(ctx.files.clone(), version, ctx.log_config)?;
        let checkpoint = writer.append_checkpoint(metadata.last_committed_tx, RECOVERY_COMPLETED_REASON)?;
        writer.sync()?;

        ctx.storage.set_recovered_metadata(TransactionMetadata {
            last_closed_position: checkpoint,
            ..metadata
        })?;
        ctx.storage.flush()?;

        self.transition(RecoveryState::Complete);
        Ok(RecoveryOutcome {
            recovery_performed: true,
            checkpoint_position: Some(checkpoint),
            ..RecoveryOutcome::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::entry::{Command, CommandBatch};
    use crate::log::CommittedTransaction;
    use crate::recovery::completeness::IncompleteTransaction;
    use crate::recovery::locks::LockGroup;
    use crate::types::StoreId;
    use std::collections::BTreeMap;
    use tidelog_storage::{InMemorySegmentStore, SegmentStore, StorageBackend};

    #[derive(Default)]
    struct MapStorage {
        values: Mutex<BTreeMap<u64, Vec<u8>>>,
        journal: Mutex<Vec<(u64, ApplicationMode)>>,
        metadata: Mutex<TransactionMetadata>,
        rolled_back: Mutex<Vec<u64>>,
    }

    impl StorageEngine for MapStorage {
        fn apply(&self, tx: &CommittedTransaction, mode: ApplicationMode) -> CoreResult<()> {
            let mut values = self.values.lock();
            match mode {
                ApplicationMode::Recovery => {
                    for command in tx.commands() {
                        match &command.after {
                            Some(after) => values.insert(command.entity, after.clone()),
                            None => values.remove(&command.entity),
                        };
                    }
                }
                ApplicationMode::ReverseRecovery => {
                    for command in tx.commands().rev() {
                        match &command.before {
                            Some(before) => values.insert(command.entity, before.clone()),
                            None => values.remove(&command.entity),
                        };
                    }
                }
            }
            self.journal.lock().push((tx.tx_id.as_u64(), mode));
            Ok(())
        }

        fn lock_recovery_commands(
            &self,
            tx: &CommittedTransaction,
            locks: &mut LockGroup,
            _mode: ApplicationMode,
        ) -> CoreResult<()> {
            for entity in tx.entities() {
                locks.acquire(entity);
            }
            Ok(())
        }

        fn rollback_incomplete(&self, tx: &IncompleteTransaction) -> CoreResult<()> {
            self.rolled_back.lock().push(tx.tx_id.as_u64());
            Ok(())
        }

        fn metadata(&self) -> CoreResult<TransactionMetadata> {
            Ok(*self.metadata.lock())
        }

        fn set_recovered_metadata(&self, metadata: TransactionMetadata) -> CoreResult<()> {
            *self.metadata.lock() = metadata;
            Ok(())
        }

        fn flush(&self) -> CoreResult<()> {
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<InMemorySegmentStore>,
        files: LogFiles,
        storage: Arc<MapStorage>,
        log_dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(InMemorySegmentStore::new());
            Self {
                log_dir: dir.path().to_path_buf(),
                _dir: dir,
                files: LogFiles::new(store.clone(), StoreId::random()),
                store,
                storage: Arc::new(MapStorage::default()),
            }
        }

        fn writer(&self) -> LogWriter {
            LogWriter::create(self.files.clone(), 0, LogConfig::default()).unwrap()
        }

        fn recovery(&self, config: RecoveryConfig) -> Recovery {
            Recovery::new(
                RecoveryContext::new(self.files.clone(), self.storage.clone(), &self.log_dir)
                    .with_config(config),
            )
        }
    }

    fn put(writer: &mut LogWriter, tx: u64, entity: u64, before: Option<u8>, after: u8) {
        let tx_id = TransactionId::new(tx);
        let command = match before {
            Some(before) => Command::update(entity, vec![before], vec![after]),
            None => Command::create(entity, vec![after]),
        };
        writer
            .append_transaction(tx_id, &[CommandBatch::single(tx_id, vec![command])])
            .unwrap();
    }

    #[test]
    fn clean_log_needs_no_recovery() {
        let fx = Fixture::new();
        let mut writer = fx.writer();
        writer.append_checkpoint(TransactionId::new(0), "clean").unwrap();

        let recovery = fx.recovery(RecoveryConfig::default());
        let outcome = recovery.run().unwrap();
        assert!(!outcome.recovery_performed);
        assert_eq!(recovery.state(), RecoveryState::NotRequired);
    }

    #[test]
    fn replays_and_checkpoints() {
        let fx = Fixture::new();
        let mut writer = fx.writer();
        put(&mut writer, 1, 10, None, 1);
        put(&mut writer, 2, 10, Some(1), 2);
        put(&mut writer, 3, 11, None, 3);

        let recovery = fx.recovery(RecoveryConfig::default());
        let outcome = recovery.run().unwrap();
        assert_eq!(recovery.state(), RecoveryState::Complete);
        assert_eq!(outcome.reversed_transactions, 3);
        assert_eq!(outcome.recovered_transactions, 3);
        assert_eq!(outcome.last_recovered_tx, Some(TransactionId::new(3)));

        let values = fx.storage.values.lock().clone();
        assert_eq!(values[&10], vec![2]);
        assert_eq!(values[&11], vec![3]);

        let modes: Vec<_> = fx.storage.journal.lock().iter().map(|(id, _)| *id).collect();
        assert_eq!(modes, vec![3, 2, 1, 1, 2, 3]);

        let metadata = *fx.storage.metadata.lock();
        assert_eq!(metadata.last_committed_tx, TransactionId::new(3));
        assert_eq!(metadata.last_closed_position, LogPosition::new(0, fx.store.segment_size(0).unwrap()));

        let tail = recovery.tail_state().unwrap();
        assert!(!tail.is_recovery_required());
        assert_eq!(tail.last_checkpoint.unwrap().reason, RECOVERY_COMPLETED_REASON);
    }

    #[test]
    fn torn_tail_truncated_and_incomplete_rolled_back() {
        let fx = Fixture::new();
        let mut writer = fx.writer();
        put(&mut writer, 1, 10, None, 1);
        writer.append(&LogEntry::start(TransactionId::new(2), 0)).unwrap();
        put(&mut writer, 3, 11, None, 3);
        let keep = writer.position().unwrap();
        fx.store.open(0).unwrap().append(&[2, 50, 0]).unwrap();

        let outcome = fx.recovery(RecoveryConfig::default()).run().unwrap();
        assert_eq!(outcome.recovered_transactions, 2);
        assert_eq!(outcome.rolled_back, vec![TransactionId::new(2)]);
        assert_eq!(outcome.truncated_at, Some(keep));
        assert!(outcome.archive.as_ref().unwrap().exists());
        assert_eq!(*fx.storage.rolled_back.lock(), vec![2]);

        // Rollback marker then checkpoint follow the truncation point.
        let mut reader = fx.files.reader(0, Some(keep.byte_offset)).unwrap();
        let rollback = reader.next_entry().unwrap().unwrap();
        assert!(matches!(rollback.entry, LogEntry::Rollback { tx_id, .. } if tx_id == TransactionId::new(2)));
        let checkpoint = reader.next_entry().unwrap().unwrap();
        assert!(matches!(checkpoint.entry, LogEntry::Checkpoint { .. }));
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn garbage_fails_when_strict() {
        let fx = Fixture::new();
        let mut writer = fx.writer();
        put(&mut writer, 1, 10, None, 1);
        let size = fx.store.segment_size(0).unwrap();
        fx.store.open(0).unwrap().append(&[0, 0, 0, 9, 9]).unwrap();

        let recovery = fx.recovery(RecoveryConfig::default());
        let err = recovery.run().unwrap_err();
        assert!(err.to_string().contains("fail_on_corrupted_logs = false"));
        assert_eq!(recovery.state(), RecoveryState::Failed);
        assert_eq!(fx.store.segment_size(0).unwrap(), size + 5);
    }

    #[test]
    fn canceled_run_leaves_log_alone() {
        let fx = Fixture::new();
        let mut writer = fx.writer();
        put(&mut writer, 1, 10, None, 1);
        let size = fx.store.segment_size(0).unwrap();

        let cancellation = Arc::new(RecoveryCancellation::new());
        cancellation.cancel();
        let recovery = Recovery::new(
            RecoveryContext::new(fx.files.clone(), fx.storage.clone(), &fx.log_dir)
                .with_cancellation(cancellation),
        );
        assert!(matches!(recovery.run(), Err(CoreError::RecoveryCanceled)));
        assert_eq!(fx.store.segment_size(0).unwrap(), size);
        assert!(fx.storage.journal.lock().is_empty());
    }

    #[test]
    fn fresh_store_gets_initial_segment() {
        let fx = Fixture::new();
        let outcome = fx.recovery(RecoveryConfig::default()).run().unwrap();
        assert!(!outcome.recovery_performed);
        assert_eq!(fx.files.versions().unwrap(), vec![0]);
    }

    #[test]
    fn missing_logs_for_used_store() {
        let fx = Fixture::new();
        *fx.storage.metadata.lock() = TransactionMetadata {
            last_committed_tx: TransactionId::new(42),
            checksum: 7,
            last_closed_position: LogPosition::new(3, 900),
        };

        assert!(matches!(
            fx.recovery(RecoveryConfig::default()).run(),
            Err(CoreError::LogsMissing)
        ));

        let outcome = fx
            .recovery(RecoveryConfig::default().fail_on_missing_logs(false))
            .run()
            .unwrap();
        assert_eq!(outcome.checkpoint_position, Some(LogPosition::new(3, 64)));
        assert_eq!(fx.files.versions().unwrap(), vec![3]);
        assert_eq!(fx.storage.metadata.lock().last_closed_position, LogPosition::new(3, 64));
    }

    #[test]
    fn parallel_forward_pass_matches_sequential() {
        let fx = Fixture::new();
        let mut writer = fx.writer();
        for tx in 1..=20 {
            put(&mut writer, tx, tx % 4, None, tx as u8);
        }

        let config = RecoveryConfig::default().parallel_recovery(true).parallel_workers(4);
        let outcome = fx.recovery(config).run().unwrap();
        assert_eq!(outcome.recovered_transactions, 20);

        let values = fx.storage.values.lock().clone();
        assert_eq!(values[&0], vec![20]);
        assert_eq!(values[&1], vec![17]);
        assert_eq!(values[&2], vec![18]);
        assert_eq!(values[&3], vec![19]);
    }
}
