//! A storage engine that records what recovery did to it.
//!
//! Entities are a map from id to bytes. Applying a transaction in
//! [`ApplicationMode::Recovery`] writes each command's after image in
//! order; [`ApplicationMode::ReverseRecovery`] writes the before images in
//! reverse order. Absent images remove the entity.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;
use tidelog_core::recovery::IncompleteTransaction;
use tidelog_core::{
    ApplicationMode, CommittedTransaction, CoreError, CoreResult, LockGroup, StorageEngine,
    TransactionId, TransactionMetadata,
};

type DelayFn = Box<dyn Fn(TransactionId) -> Duration + Send + Sync>;

/// In-memory [`StorageEngine`] with journals and failure injection.
#[derive(Default)]
pub struct RecordingStorageEngine {
    values: Mutex<BTreeMap<u64, Vec<u8>>>,
    applied: Mutex<Vec<(TransactionId, ApplicationMode)>>,
    lock_order: Mutex<Vec<TransactionId>>,
    rolled_back: Mutex<Vec<TransactionId>>,
    metadata: Mutex<TransactionMetadata>,
    flushes: Mutex<u64>,
    fail_on: Mutex<Option<TransactionId>>,
    delay: Option<DelayFn>,
}

impl RecordingStorageEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with `metadata` already stored.
    pub fn with_metadata(self, metadata: TransactionMetadata) -> Self {
        *self.metadata.lock() = metadata;
        self
    }

    /// Starts with entity values already stored.
    pub fn with_values(self, values: BTreeMap<u64, Vec<u8>>) -> Self {
        *self.values.lock() = values;
        self
    }

    /// Sleeps for `delay(tx_id)` inside every forward apply.
    pub fn with_apply_delay(
        mut self,
        delay: impl Fn(TransactionId) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    /// Makes applying `tx_id` fail.
    pub fn fail_on(&self, tx_id: TransactionId) {
        *self.fail_on.lock() = Some(tx_id);
    }

    /// Current entity values.
    pub fn values(&self) -> BTreeMap<u64, Vec<u8>> {
        self.values.lock().clone()
    }

    /// Current value of one entity.
    pub fn value(&self, entity: u64) -> Option<Vec<u8>> {
        self.values.lock().get(&entity).cloned()
    }

    /// Every completed apply, in completion order.
    pub fn applied(&self) -> Vec<(TransactionId, ApplicationMode)> {
        self.applied.lock().clone()
    }

    /// Transactions applied in `mode`, in completion order.
    pub fn applied_in(&self, mode: ApplicationMode) -> Vec<TransactionId> {
        self.applied
            .lock()
            .iter()
            .filter(|(_, m)| *m == mode)
            .map(|(tx_id, _)| *tx_id)
            .collect()
    }

    /// Transactions in the order their locks were taken.
    pub fn lock_order(&self) -> Vec<TransactionId> {
        self.lock_order.lock().clone()
    }

    /// Incomplete transactions rolled back.
    pub fn rolled_back(&self) -> Vec<TransactionId> {
        self.rolled_back.lock().clone()
    }

    /// Stored metadata.
    pub fn stored_metadata(&self) -> TransactionMetadata {
        *self.metadata.lock()
    }

    /// Number of flushes.
    pub fn flush_count(&self) -> u64 {
        *self.flushes.lock()
    }

    /// Forgets the journals, keeping values and metadata.
    pub fn clear_journals(&self) {
        self.applied.lock().clear();
        self.lock_order.lock().clear();
        self.rolled_back.lock().clear();
    }
}

impl StorageEngine for RecordingStorageEngine {
    fn apply(&self, tx: &CommittedTransaction, mode: ApplicationMode) -> CoreResult<()> {
        if *self.fail_on.lock() == Some(tx.tx_id) {
            return Err(CoreError::apply(tx.tx_id, "injected failure"));
        }

        if mode == ApplicationMode::Recovery {
            if let Some(delay) = &self.delay {
                std::thread::sleep(delay(tx.tx_id));
            }
        }

        {
            let mut values = self.values.lock();
            let mut write = |entity: u64, image: &Option<Vec<u8>>| match image {
                Some(bytes) => {
                    values.insert(entity, bytes.clone());
                }
                None => {
                    values.remove(&entity);
                }
            };
            match mode {
                ApplicationMode::Recovery => {
                    for command in tx.commands() {
                        write(command.entity, &command.after);
                    }
                }
                ApplicationMode::ReverseRecovery => {
                    for command in tx.commands().rev() {
                        write(command.entity, &command.before);
                    }
                }
            }
        }

        self.applied.lock().push((tx.tx_id, mode));
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
        self.lock_order.lock().push(tx.tx_id);
        Ok(())
    }

    fn rollback_incomplete(&self, tx: &IncompleteTransaction) -> CoreResult<()> {
        self.rolled_back.lock().push(tx.tx_id);
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
        *self.flushes.lock() += 1;
        Ok(())
    }
}

impl std::fmt::Debug for RecordingStorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingStorageEngine")
            .field("entities", &self.values.lock().len())
            .field("applied", &self.applied.lock().len())
            .finish_non_exhaustive()
    }
}
