//! Log tail scanning.
//!
//! The scanner walks segments from the newest down until it finds a
//! checkpoint, classifying the tail on the way, then reads forward from
//! that checkpoint to see whether anything was committed after it.

use crate::error::{CoreError, CoreResult};
use crate::log::entry::LogEntry;
use crate::log::files::LogFiles;
use crate::log::reader::StreamEnd;
use crate::types::{LogPosition, StoreId, TransactionId};
use once_cell::sync::OnceCell;

/// A checkpoint found in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Position recovery may resume from.
    pub position: LogPosition,
    /// Where the checkpoint entry itself begins.
    pub entry_position: LogPosition,
    /// Last transaction applied when the checkpoint was taken.
    pub last_tx_id: TransactionId,
    /// Wall clock time in milliseconds.
    pub timestamp: u64,
    /// Why the checkpoint was taken.
    pub reason: String,
}

/// What the scanner learned about the log tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTailState {
    /// Most recent checkpoint, if any survives.
    pub last_checkpoint: Option<CheckpointInfo>,
    /// First transaction committed (or, failing that, started) after the
    /// checkpoint.
    pub first_tx_id_after_checkpoint: Option<TransactionId>,
    /// Whether any transaction started or committed after the checkpoint.
    pub commits_after_checkpoint: bool,
    /// Number of commits after the checkpoint.
    pub transactions_after_checkpoint: u64,
    /// Lowest version the backward scan reached.
    pub oldest_version_scanned: Option<u64>,
    /// Lowest existing version.
    pub lowest_version: Option<u64>,
    /// Highest existing version.
    pub highest_version: Option<u64>,
    /// Just past the last readable entry of the highest segment.
    pub end_position: LogPosition,
    /// Whether damaged or incomplete data was found.
    pub corrupted: bool,
    /// Where the first damage was found.
    pub corruption_position: Option<LogPosition>,
    /// Whether there are no log segments at all.
    pub logs_missing: bool,
    /// Identity of the store the log belongs to.
    pub store_id: StoreId,
}

impl LogTailState {
    fn missing(store_id: StoreId) -> Self {
        Self {
            last_checkpoint: None,
            first_tx_id_after_checkpoint: None,
            commits_after_checkpoint: false,
            transactions_after_checkpoint: 0,
            oldest_version_scanned: None,
            lowest_version: None,
            highest_version: None,
            end_position: LogPosition::UNSPECIFIED,
            corrupted: false,
            corruption_position: None,
            logs_missing: true,
            store_id,
        }
    }

    /// Whether recovery has anything to do.
    #[must_use]
    pub const fn is_recovery_required(&self) -> bool {
        self.corrupted || self.logs_missing || self.commits_after_checkpoint
    }
}

/// Result of scanning one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// No checkpoint here; keep going to older segments.
    Continue,
    /// The segment's latest checkpoint.
    CheckpointFound(CheckpointInfo),
    /// The segment is damaged at `at`. A checkpoint read before the damage
    /// is still usable.
    Corrupted {
        /// Where the damage starts.
        at: LogPosition,
        /// Latest checkpoint before the damage.
        checkpoint: Option<CheckpointInfo>,
    },
}

#[derive(Debug, Default)]
struct AfterCheckpoint {
    first_start: Option<TransactionId>,
    first_commit: Option<TransactionId>,
    commits: u64,
}

/// Scans the log tail once and remembers the result.
#[derive(Debug)]
pub struct LogTailScanner {
    files: LogFiles,
    fail_on_corrupted_logs: bool,
    state: OnceCell<LogTailState>,
}

impl LogTailScanner {
    /// Creates a scanner. Nothing is read until [`Self::tail_state`].
    #[must_use]
    pub fn new(files: LogFiles, fail_on_corrupted_logs: bool) -> Self {
        Self {
            files,
            fail_on_corrupted_logs,
            state: OnceCell::new(),
        }
    }

    /// Scans the tail on first use and returns the cached state afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnableToRecover`] for damaged segments when
    /// failing on corruption, [`CoreError::StoreIdMismatch`] for foreign
    /// segments, and any I/O error.
    pub fn tail_state(&self) -> CoreResult<&LogTailState> {
        self.state.get_or_try_init(|| self.scan())
    }

    fn scan(&self) -> CoreResult<LogTailState> {
        let versions = self.files.versions()?;
        let (Some(&lowest), Some(&highest)) = (versions.first(), versions.last()) else {
            tracing::info!("no transaction log segments found");
            return Ok(LogTailState::missing(self.files.store_id()));
        };

        let mut checkpoint = None;
        let mut corruption = None;
        let mut oldest_scanned = highest;
        let mut end_position = LogPosition::UNSPECIFIED;

        for &version in versions.iter().rev() {
            oldest_scanned = version;
            let (outcome, end) = self.scan_segment(version, version == highest)?;
            if version == highest {
                end_position = end;
            }

            match outcome {
                ScanOutcome::Continue => {}
                ScanOutcome::CheckpointFound(found) => {
                    checkpoint = Some(found);
                    break;
                }
                ScanOutcome::Corrupted { at, checkpoint: found } => {
                    corruption = Some(at);
                    if found.is_some() {
                        checkpoint = found;
                        break;
                    }
                }
            }
        }

        let from = match &checkpoint {
            Some(found) => found.position,
            None => self.files.first_entry_position(lowest)?,
        };
        let after = self.scan_after(from, corruption)?;

        let state = LogTailState {
            first_tx_id_after_checkpoint: after.first_commit.or(after.first_start),
            commits_after_checkpoint: after.first_start.is_some() || after.commits > 0,
            transactions_after_checkpoint: after.commits,
            last_checkpoint: checkpoint,
            oldest_version_scanned: Some(oldest_scanned),
            lowest_version: Some(lowest),
            highest_version: Some(highest),
            end_position,
            corrupted: corruption.is_some(),
            corruption_position: corruption,
            logs_missing: false,
            store_id: self.files.store_id(),
        };

        tracing::debug!(
            checkpoint = ?state.last_checkpoint.as_ref().map(|c| c.position),
            commits = state.transactions_after_checkpoint,
            corrupted = state.corrupted,
            "scanned log tail"
        );
        Ok(state)
    }

    /// Reads one segment, returning its outcome and where reading stopped.
    fn scan_segment(&self, version: u64, is_highest: bool) -> CoreResult<(ScanOutcome, LogPosition)> {
        let mut reader = self.files.reader(version, None)?;
        let mut latest = None;

        loop {
            match reader.next_entry() {
                Ok(Some(positioned)) => {
                    if let LogEntry::Checkpoint {
                        position,
                        last_tx_id,
                        timestamp,
                        reason,
                    } = positioned.entry
                    {
                        latest = Some(CheckpointInfo {
                            position,
                            entry_position: positioned.position,
                            last_tx_id,
                            timestamp,
                            reason,
                        });
                    }
                }
                Ok(None) => break,
                Err(e) if e.is_corruption() => {
                    let at = reader.entry_position();
                    return Ok((self.corrupted(e, at, latest)?, at));
                }
                Err(e) => return Err(e),
            }
        }

        let end = reader.entry_position();
        if reader.stream_end() == Some(StreamEnd::Truncated) {
            if is_highest {
                tracing::warn!(%end, "transaction log ends with an incomplete entry");
                return Ok((ScanOutcome::Corrupted { at: end, checkpoint: latest }, end));
            }
            let e = CoreError::log_corruption(end, "incomplete entry before the last log segment");
            return Ok((self.corrupted(e, end, latest)?, end));
        }

        Ok((latest.map_or(ScanOutcome::Continue, ScanOutcome::CheckpointFound), end))
    }

    fn corrupted(
        &self,
        error: CoreError,
        at: LogPosition,
        checkpoint: Option<CheckpointInfo>,
    ) -> CoreResult<ScanOutcome> {
        if self.fail_on_corrupted_logs {
            return Err(CoreError::unable_to_recover(error));
        }
        tracing::warn!(%at, error = %error, "transaction log is corrupted");
        Ok(ScanOutcome::Corrupted { at, checkpoint })
    }

    /// Reads forward from `from` up to the damage, if any.
    fn scan_after(&self, from: LogPosition, bound: Option<LogPosition>) -> CoreResult<AfterCheckpoint> {
        let mut after = AfterCheckpoint::default();
        let versions = self
            .files
            .versions()?
            .into_iter()
            .filter(|&v| v >= from.segment_version)
            .filter(|&v| bound.map_or(true, |b| v <= b.segment_version));

        for version in versions {
            let start = (version == from.segment_version).then_some(from.byte_offset);
            let mut reader = self.files.reader(version, start)?;
            if let Some(b) = bound.filter(|b| b.segment_version == version) {
                reader = reader.with_limit(b.byte_offset);
            }

            loop {
                match reader.next_entry() {
                    Ok(Some(positioned)) => match positioned.entry {
                        LogEntry::Start { tx_id, .. } => {
                            after.first_start.get_or_insert(tx_id);
                        }
                        LogEntry::Commit { tx_id, .. } => {
                            after.first_commit.get_or_insert(tx_id);
                            after.commits += 1;
                        }
                        _ => {}
                    },
                    Ok(None) => break,
                    // Already classified by the backward scan.
                    Err(e) if e.is_corruption() => break,
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(after)
    }
}
