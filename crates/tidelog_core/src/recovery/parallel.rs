//! Parallel application of recovered transactions.
//!
//! Each submitted transaction gets a ticket. A worker may only lock its
//! transaction's entities once the previous ticket has locked its own, so
//! locks are always taken in log order; the mutations themselves then run
//! concurrently. Transactions touching the same entity therefore still
//! apply in log order, while disjoint ones overlap.

use crate::error::{CoreError, CoreResult};
use crate::log::CommittedTransaction;
use crate::recovery::locks::{EntityLocks, LockGroup};
use crate::recovery::monitor::{ProgressReporter, RecoveryMonitor};
use crate::recovery::storage::{ApplicationMode, StorageEngine};
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often a waiting worker rechecks the failure flag.
const FAILURE_CHECK_INTERVAL: Duration = Duration::from_millis(10);

struct Job {
    ticket: u64,
    tx: CommittedTransaction,
}

#[derive(Default)]
struct ApplierState {
    /// Ticket allowed to take its locks next.
    next_to_lock: u64,
    /// Submitted and not yet finished.
    pending: usize,
    failed: bool,
    error: Option<CoreError>,
}

impl ApplierState {
    fn fail(&mut self, error: CoreError) {
        if !self.failed {
            tracing::error!(%error, "parallel recovery worker failed");
            self.failed = true;
            self.error = Some(error);
        }
    }
}

struct Shared {
    storage: Arc<dyn StorageEngine>,
    mode: ApplicationMode,
    locks: Arc<EntityLocks>,
    monitor: Arc<dyn RecoveryMonitor>,
    progress: Arc<dyn ProgressReporter>,
    state: Mutex<ApplierState>,
    changed: Condvar,
}

impl Shared {
    fn run(&self, job: Job) {
        let tx_id = job.tx.tx_id;
        if !self.wait_for_turn(job.ticket) {
            self.finish(None);
            return;
        }

        let mut group = LockGroup::new(Arc::clone(&self.locks));
        let locked = self.storage.lock_recovery_commands(&job.tx, &mut group, self.mode);
        {
            let mut state = self.state.lock();
            state.next_to_lock += 1;
            self.changed.notify_all();
        }
        if let Err(e) = locked {
            self.finish(Some(e));
            return;
        }

        let applied = self.storage.apply(&job.tx, self.mode);
        drop(group);

        match applied {
            Ok(()) => {
                self.monitor.transaction_recovered(tx_id, self.mode);
                self.progress.add(1);
                self.finish(None);
            }
            Err(e) => self.finish(Some(e)),
        }
    }

    /// Waits until `ticket` may lock. Returns `false` if the run failed.
    fn wait_for_turn(&self, ticket: u64) -> bool {
        let mut state = self.state.lock();
        while state.next_to_lock != ticket && !state.failed {
            self.changed.wait_for(&mut state, FAILURE_CHECK_INTERVAL);
        }
        !state.failed
    }

    fn finish(&self, error: Option<CoreError>) {
        let mut state = self.state.lock();
        state.pending -= 1;
        if let Some(error) = error {
            state.fail(error);
        }
        self.changed.notify_all();
    }
}

fn worker_loop(shared: &Shared, jobs: &Mutex<Receiver<Job>>) {
    loop {
        let job = jobs.lock().recv();
        match job {
            Ok(job) => shared.run(job),
            Err(_) => break,
        }
    }
}

/// Applies transactions on a pool of worker threads, preserving the order
/// in which their locks are taken.
pub struct ParallelRecoveryApplier {
    shared: Arc<Shared>,
    sender: Option<SyncSender<Job>>,
    workers: Vec<JoinHandle<()>>,
    next_ticket: u64,
    close_timeout: Duration,
}

impl ParallelRecoveryApplier {
    /// Starts `workers` threads applying in `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn start(
        storage: Arc<dyn StorageEngine>,
        mode: ApplicationMode,
        workers: usize,
        close_timeout: Duration,
        monitor: Arc<dyn RecoveryMonitor>,
        progress: Arc<dyn ProgressReporter>,
    ) -> CoreResult<Self> {
        let workers = workers.max(1);
        let shared = Arc::new(Shared {
            storage,
            mode,
            locks: EntityLocks::new(),
            monitor,
            progress,
            state: Mutex::new(ApplierState::default()),
            changed: Condvar::new(),
        });

        let (sender, receiver) = mpsc::sync_channel(workers * 2);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut applier = Self {
            shared,
            sender: Some(sender),
            workers: Vec::with_capacity(workers),
            next_ticket: 0,
            close_timeout,
        };

        for i in 0..workers {
            let shared = Arc::clone(&applier.shared);
            let jobs = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("tidelog-recovery-{i}"))
                .spawn(move || worker_loop(&shared, &jobs))?;
            applier.workers.push(handle);
        }

        tracing::debug!(workers, "started parallel recovery");
        Ok(applier)
    }

    /// Queues a transaction. Blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ParallelApplyFailed`] once any worker has
    /// failed; [`Self::close`] then reports the first error.
    pub fn submit(&mut self, tx: CommittedTransaction) -> CoreResult<()> {
        {
            let mut state = self.shared.state.lock();
            if state.failed {
                return Err(CoreError::ParallelApplyFailed {
                    message: "a recovery worker has already failed".into(),
                });
            }
            state.pending += 1;
        }

        let job = Job {
            ticket: self.next_ticket,
            tx,
        };
        self.next_ticket += 1;

        let sent = self
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(job).is_ok());
        if !sent {
            let stopped = || CoreError::ParallelApplyFailed {
                message: "recovery workers have stopped".into(),
            };
            let mut state = self.shared.state.lock();
            state.pending -= 1;
            state.fail(stopped());
            return Err(stopped());
        }
        Ok(())
    }

    /// Waits for every queued transaction and stops the workers.
    ///
    /// # Errors
    ///
    /// Returns the first worker error, or
    /// [`CoreError::ParallelApplyTimeout`] if the queue does not drain in
    /// time.
    pub fn close(mut self) -> CoreResult<()> {
        self.sender.take();

        let deadline = Instant::now() + self.close_timeout;
        {
            let mut state = self.shared.state.lock();
            while state.pending > 0 {
                if self.shared.changed.wait_until(&mut state, deadline).timed_out() && state.pending > 0 {
                    state.failed = true;
                    self.shared.changed.notify_all();
                    // Leave stuck workers detached.
                    self.workers.clear();
                    return Err(CoreError::ParallelApplyTimeout {
                        timeout: self.close_timeout,
                    });
                }
            }
        }

        for handle in std::mem::take(&mut self.workers) {
            if handle.join().is_err() {
                self.shared.state.lock().fail(CoreError::ParallelApplyFailed {
                    message: "recovery worker panicked".into(),
                });
            }
        }

        match self.shared.state.lock().error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for ParallelRecoveryApplier {
    fn drop(&mut self) {
        self.sender.take();
        if self.workers.is_empty() {
            return;
        }
        {
            let mut state = self.shared.state.lock();
            state.failed = true;
            self.shared.changed.notify_all();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ParallelRecoveryApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelRecoveryApplier")
            .field("workers", &self.workers.len())
            .field("next_ticket", &self.next_ticket)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::entry::{Command, CommandBatch};
    use crate::recovery::monitor::LogProgressReporter;
    use crate::recovery::storage::TransactionMetadata;
    use crate::types::{LogPosition, TransactionId};
    use std::collections::HashMap;

    #[derive(Default)]
    struct SlowStorage {
        lock_order: Mutex<Vec<u64>>,
        applied: Mutex<Vec<u64>>,
        values: Mutex<HashMap<u64, Vec<u8>>>,
        fail_on: Option<u64>,
    }

    impl StorageEngine for SlowStorage {
        fn apply(&self, tx: &CommittedTransaction, _mode: ApplicationMode) -> CoreResult<()> {
            let id = tx.tx_id.as_u64();
            if self.fail_on == Some(id) {
                return Err(CoreError::apply(tx.tx_id, "injected"));
            }
            // Early transactions finish last.
            thread::sleep(Duration::from_millis(20u64.saturating_sub(id * 2)));
            for command in tx.commands() {
                if let Some(after) = &command.after {
                    self.values.lock().insert(command.entity, after.clone());
                }
            }
            self.applied.lock().push(id);
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
            self.lock_order.lock().push(tx.tx_id.as_u64());
            Ok(())
        }

        fn metadata(&self) -> CoreResult<TransactionMetadata> {
            Ok(TransactionMetadata::EMPTY)
        }

        fn set_recovered_metadata(&self, _metadata: TransactionMetadata) -> CoreResult<()> {
            Ok(())
        }

        fn flush(&self) -> CoreResult<()> {
            Ok(())
        }
    }

    struct Silent;
    impl RecoveryMonitor for Silent {}

    fn tx(id: u64, entity: u64) -> CommittedTransaction {
        let tx_id = TransactionId::new(id);
        CommittedTransaction {
            tx_id,
            start_timestamp: 0,
            commit_timestamp: 0,
            checksum: 0,
            batches: vec![CommandBatch::single(tx_id, vec![Command::create(entity, vec![id as u8])])],
            start_position: LogPosition::new(0, 64),
            end_position: LogPosition::new(0, 64),
        }
    }

    fn applier(storage: Arc<dyn StorageEngine>) -> ParallelRecoveryApplier {
        ParallelRecoveryApplier::start(
            storage,
            ApplicationMode::Recovery,
            4,
            Duration::from_secs(10),
            Arc::new(Silent),
            Arc::new(LogProgressReporter::new(10)),
        )
        .unwrap()
    }

    #[test]
    fn locks_taken_in_submission_order() {
        let storage = Arc::new(SlowStorage::default());
        let mut applier = applier(storage.clone());
        for id in 0..8 {
            applier.submit(tx(id, id % 3)).unwrap();
        }
        applier.close().unwrap();

        assert_eq!(*storage.lock_order.lock(), (0..8).collect::<Vec<_>>());
        assert_eq!(storage.applied.lock().len(), 8);
        // Last writer per entity wins.
        assert_eq!(storage.values.lock()[&0], vec![6]);
        assert_eq!(storage.values.lock()[&1], vec![7]);
        assert_eq!(storage.values.lock()[&2], vec![5]);
    }

    /// Leaves `lock_recovery_commands` to the trait default.
    #[derive(Default)]
    struct PlainStorage {
        values: Mutex<HashMap<u64, Vec<u8>>>,
    }

    impl StorageEngine for PlainStorage {
        fn apply(&self, tx: &CommittedTransaction, _mode: ApplicationMode) -> CoreResult<()> {
            thread::sleep(Duration::from_millis(40u64.saturating_sub(tx.tx_id.as_u64() * 5)));
            for command in tx.commands() {
                if let Some(after) = &command.after {
                    self.values.lock().insert(command.entity, after.clone());
                }
            }
            Ok(())
        }

        fn metadata(&self) -> CoreResult<TransactionMetadata> {
            Ok(TransactionMetadata::EMPTY)
        }

        fn set_recovered_metadata(&self, _metadata: TransactionMetadata) -> CoreResult<()> {
            Ok(())
        }

        fn flush(&self) -> CoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn default_locking_keeps_same_entity_writes_in_log_order() {
        let storage = Arc::new(PlainStorage::default());
        let mut applier = applier(storage.clone());
        for id in 1..=4 {
            applier.submit(tx(id, 7)).unwrap();
        }
        applier.close().unwrap();

        assert_eq!(storage.values.lock()[&7], vec![4]);
    }

    #[test]
    fn worker_failure_surfaces_on_close() {
        let storage = Arc::new(SlowStorage {
            fail_on: Some(2),
            ..SlowStorage::default()
        });
        let mut applier = applier(storage.clone());
        for id in 0..6 {
            if applier.submit(tx(id, id)).is_err() {
                break;
            }
        }
        let err = applier.close().unwrap_err();
        assert!(matches!(err, CoreError::Apply { .. }));
    }
}
