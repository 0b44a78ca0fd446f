//! Observers for a recovery run: monitor, progress and cancellation.

use crate::error::{CoreError, CoreResult};
use crate::recovery::orchestrator::{RecoveryOutcome, RecoveryState};
use crate::recovery::storage::ApplicationMode;
use crate::types::{LogPosition, TransactionId};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives recovery events. Every method defaults to doing nothing.
pub trait RecoveryMonitor: Send + Sync {
    /// The run moved to `state`.
    fn state_changed(&self, state: RecoveryState) {
        let _ = state;
    }

    /// The log is consistent; nothing will be replayed.
    fn no_recovery_required(&self) {}

    /// Recovery will replay from `from`.
    fn recovery_required(&self, from: LogPosition) {
        let _ = from;
    }

    /// A transaction was applied in `mode`.
    fn transaction_recovered(&self, tx_id: TransactionId, mode: ApplicationMode) {
        let _ = (tx_id, mode);
    }

    /// An incomplete transaction was rolled back.
    fn incomplete_transaction_rolled_back(&self, tx_id: TransactionId) {
        let _ = tx_id;
    }

    /// The log was truncated at `position`.
    fn logs_truncated(&self, position: LogPosition, archive: Option<&Path>) {
        let _ = (position, archive);
    }

    /// The run finished.
    fn recovery_completed(&self, outcome: &RecoveryOutcome) {
        let _ = outcome;
    }

    /// The run failed.
    fn recovery_failed(&self, error: &CoreError) {
        let _ = error;
    }
}

/// Logs recovery events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRecoveryMonitor;

impl RecoveryMonitor for LoggingRecoveryMonitor {
    fn state_changed(&self, state: RecoveryState) {
        tracing::debug!(?state, "recovery state changed");
    }

    fn no_recovery_required(&self) {
        tracing::info!("transaction logs are consistent, no recovery required");
    }

    fn recovery_required(&self, from: LogPosition) {
        tracing::info!(%from, "recovery required");
    }

    fn transaction_recovered(&self, tx_id: TransactionId, mode: ApplicationMode) {
        tracing::trace!(%tx_id, ?mode, "recovered transaction");
    }

    fn incomplete_transaction_rolled_back(&self, tx_id: TransactionId) {
        tracing::info!(%tx_id, "rolled back incomplete transaction");
    }

    fn logs_truncated(&self, position: LogPosition, archive: Option<&Path>) {
        tracing::warn!(
            %position,
            archive = ?archive.map(Path::display),
            "transaction logs truncated"
        );
    }

    fn recovery_completed(&self, outcome: &RecoveryOutcome) {
        tracing::info!(
            recovered = outcome.recovered_transactions,
            rolled_back = outcome.rolled_back.len(),
            "recovery completed"
        );
    }

    fn recovery_failed(&self, error: &CoreError) {
        tracing::error!(%error, "recovery failed");
    }
}

/// Receives progress in abstract units.
pub trait ProgressReporter: Send + Sync {
    /// Work of `total` units is about to start.
    fn start(&self, total: u64);
    /// `units` more units are done.
    fn add(&self, units: u64);
    /// All work is done.
    fn completed(&self);
}

#[derive(Debug, Default)]
struct Progress {
    total: u64,
    done: u64,
    last_percent: u8,
}

/// Logs progress every `step` percent.
#[derive(Debug)]
pub struct LogProgressReporter {
    step: u8,
    progress: Mutex<Progress>,
}

impl LogProgressReporter {
    /// Creates a reporter logging every `step_percent` percent.
    #[must_use]
    pub fn new(step_percent: u8) -> Self {
        Self {
            step: step_percent.clamp(1, 100),
            progress: Mutex::new(Progress::default()),
        }
    }

    /// Last percentage logged.
    #[must_use]
    pub fn last_reported_percent(&self) -> u8 {
        self.progress.lock().last_percent
    }
}

impl ProgressReporter for LogProgressReporter {
    fn start(&self, total: u64) {
        *self.progress.lock() = Progress {
            total,
            ..Progress::default()
        };
    }

    fn add(&self, units: u64) {
        let mut progress = self.progress.lock();
        progress.done = progress.done.saturating_add(units);
        if progress.total == 0 {
            return;
        }
        let percent = (progress.done.min(progress.total) * 100 / progress.total) as u8;
        let reached = percent - percent % self.step;
        if reached > progress.last_percent {
            progress.last_percent = reached;
            tracing::info!(percent = reached, "recovery progress");
        }
    }

    fn completed(&self) {
        let mut progress = self.progress.lock();
        if progress.last_percent < 100 {
            progress.last_percent = 100;
            tracing::info!(percent = 100u8, "recovery progress");
        }
    }
}

/// Cooperative cancellation, checked between transactions.
#[derive(Debug, Default)]
pub struct RecoveryCancellation {
    canceled: AtomicBool,
}

impl RecoveryCancellation {
    /// Creates a token that is not canceled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Returns [`CoreError::RecoveryCanceled`] once cancellation was requested.
    pub fn check_if_canceled(&self) -> CoreResult<()> {
        if self.is_canceled() {
            return Err(CoreError::RecoveryCanceled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_reports_in_steps() {
        let reporter = LogProgressReporter::new(10);
        reporter.start(40);
        reporter.add(3);
        assert_eq!(reporter.last_reported_percent(), 0);
        reporter.add(1);
        assert_eq!(reporter.last_reported_percent(), 10);
        reporter.add(15);
        assert_eq!(reporter.last_reported_percent(), 40);
        reporter.add(100);
        assert_eq!(reporter.last_reported_percent(), 100);
    }

    #[test]
    fn empty_run_completes() {
        let reporter = LogProgressReporter::new(25);
        reporter.start(0);
        reporter.add(1);
        reporter.completed();
        assert_eq!(reporter.last_reported_percent(), 100);
    }

    #[test]
    fn cancellation() {
        let cancel = RecoveryCancellation::new();
        assert!(cancel.check_if_canceled().is_ok());
        cancel.cancel();
        assert!(matches!(cancel.check_if_canceled(), Err(CoreError::RecoveryCanceled)));
    }
}
