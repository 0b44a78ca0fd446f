//! Where recovery starts.

use crate::error::{CoreError, CoreResult};
use crate::log::header::LOG_HEADER_SIZE;
use crate::recovery::tail::{CheckpointInfo, LogTailState};
use crate::types::{LogPosition, TransactionId, INITIAL_LOG_VERSION};

/// The position recovery replays from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryStartInformation {
    /// First position to replay; unspecified when nothing needs replaying.
    pub recovery_position: LogPosition,
    /// First transaction after the checkpoint.
    pub first_tx_id_after_checkpoint: Option<TransactionId>,
    /// Checkpoint the position came from.
    pub checkpoint: Option<CheckpointInfo>,
    /// Whether the log has no segments at all.
    pub missing_logs: bool,
}

impl RecoveryStartInformation {
    /// Nothing to recover.
    pub const NO_RECOVERY_REQUIRED: Self = Self {
        recovery_position: LogPosition::UNSPECIFIED,
        first_tx_id_after_checkpoint: None,
        checkpoint: None,
        missing_logs: false,
    };

    /// Whether recovery has work to do.
    #[must_use]
    pub const fn is_recovery_required(&self) -> bool {
        self.missing_logs || self.recovery_position.is_specified()
    }
}

/// Turns a scanned tail into a recovery start.
///
/// # Errors
///
/// Returns [`CoreError::MissingCheckpointHistory`] when there is no usable
/// checkpoint and the first log segment has been removed.
pub fn resolve_recovery_start(tail: &LogTailState) -> CoreResult<RecoveryStartInformation> {
    if tail.logs_missing {
        return Ok(RecoveryStartInformation {
            missing_logs: true,
            ..RecoveryStartInformation::NO_RECOVERY_REQUIRED
        });
    }
    if !tail.is_recovery_required() {
        return Ok(RecoveryStartInformation::NO_RECOVERY_REQUIRED);
    }

    let oldest = tail.lowest_version.unwrap_or(INITIAL_LOG_VERSION);
    let recovery_position = match &tail.last_checkpoint {
        Some(checkpoint) if checkpoint.position.segment_version < oldest => {
            return Err(CoreError::MissingCheckpointHistory {
                oldest_version: oldest,
            });
        }
        Some(checkpoint) => checkpoint.position,
        None if tail.oldest_version_scanned == Some(INITIAL_LOG_VERSION) => {
            LogPosition::new(INITIAL_LOG_VERSION, LOG_HEADER_SIZE)
        }
        None => {
            return Err(CoreError::MissingCheckpointHistory {
                oldest_version: oldest,
            });
        }
    };

    Ok(RecoveryStartInformation {
        recovery_position,
        first_tx_id_after_checkpoint: tail.first_tx_id_after_checkpoint,
        checkpoint: tail.last_checkpoint.clone(),
        missing_logs: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoreId;

    fn tail() -> LogTailState {
        LogTailState {
            last_checkpoint: None,
            first_tx_id_after_checkpoint: Some(TransactionId::new(1)),
            commits_after_checkpoint: true,
            transactions_after_checkpoint: 1,
            oldest_version_scanned: Some(0),
            lowest_version: Some(0),
            highest_version: Some(0),
            end_position: LogPosition::new(0, 200),
            corrupted: false,
            corruption_position: None,
            logs_missing: false,
            store_id: StoreId::random(),
        }
    }

    fn checkpoint(at: LogPosition) -> CheckpointInfo {
        CheckpointInfo {
            position: at,
            entry_position: at,
            last_tx_id: TransactionId::new(9),
            timestamp: 0,
            reason: "test".into(),
        }
    }

    #[test]
    fn clean_tail_needs_nothing() {
        let mut tail = tail();
        tail.commits_after_checkpoint = false;
        let start = resolve_recovery_start(&tail).unwrap();
        assert_eq!(start, RecoveryStartInformation::NO_RECOVERY_REQUIRED);
        assert!(!start.is_recovery_required());
    }

    #[test]
    fn checkpoint_position_wins() {
        let mut tail = tail();
        tail.last_checkpoint = Some(checkpoint(LogPosition::new(1, 128)));
        tail.lowest_version = Some(1);
        tail.oldest_version_scanned = Some(1);

        let start = resolve_recovery_start(&tail).unwrap();
        assert_eq!(start.recovery_position, LogPosition::new(1, 128));
        assert!(start.is_recovery_required());
    }

    #[test]
    fn no_checkpoint_starts_at_first_segment() {
        let start = resolve_recovery_start(&tail()).unwrap();
        assert_eq!(start.recovery_position, LogPosition::new(0, 64));
    }

    #[test]
    fn pruned_history_is_fatal() {
        let mut tail = tail();
        tail.lowest_version = Some(3);
        tail.oldest_version_scanned = Some(3);
        assert!(matches!(
            resolve_recovery_start(&tail),
            Err(CoreError::MissingCheckpointHistory { oldest_version: 3 })
        ));

        tail.last_checkpoint = Some(checkpoint(LogPosition::new(2, 64)));
        assert!(resolve_recovery_start(&tail).is_err());
    }

    #[test]
    fn missing_logs_flagged() {
        let mut tail = tail();
        tail.logs_missing = true;
        let start = resolve_recovery_start(&tail).unwrap();
        assert!(start.missing_logs);
        assert!(start.is_recovery_required());
    }
}
