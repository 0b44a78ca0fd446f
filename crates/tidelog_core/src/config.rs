//! Recovery and log configuration.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Default name of the directory holding archived corrupted log content.
pub const DEFAULT_ARCHIVE_DIR_NAME: &str = "corrupted-tx-logs";

/// Configuration for a recovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Whether corruption in the log aborts recovery.
    ///
    /// When disabled, recovery replays up to the last readable transaction
    /// and truncates the rest after archiving it.
    pub fail_on_corrupted_logs: bool,

    /// Whether a store with committed data but no logs refuses to start.
    pub fail_on_missing_logs: bool,

    /// Whether the forward pass applies transactions on a worker pool.
    pub parallel_recovery: bool,

    /// Number of parallel apply workers.
    pub parallel_workers: usize,

    /// How long closing the worker pool may wait for queued work.
    pub parallel_close_timeout: Duration,

    /// Progress is logged every time this many percent complete.
    pub progress_report_step_percent: u8,

    /// Directory (relative to the archive root) for corrupted log archives.
    pub archive_dir_name: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            fail_on_corrupted_logs: true,
            fail_on_missing_logs: true,
            parallel_recovery: false,
            parallel_workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            parallel_close_timeout: Duration::from_secs(60),
            progress_report_step_percent: 10,
            archive_dir_name: DEFAULT_ARCHIVE_DIR_NAME.to_string(),
        }
    }
}

impl RecoveryConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether corruption aborts recovery.
    #[must_use]
    pub const fn fail_on_corrupted_logs(mut self, value: bool) -> Self {
        self.fail_on_corrupted_logs = value;
        self
    }

    /// Sets whether missing logs abort recovery.
    #[must_use]
    pub const fn fail_on_missing_logs(mut self, value: bool) -> Self {
        self.fail_on_missing_logs = value;
        self
    }

    /// Enables or disables parallel forward apply.
    #[must_use]
    pub const fn parallel_recovery(mut self, value: bool) -> Self {
        self.parallel_recovery = value;
        self
    }

    /// Sets the number of parallel apply workers (at least one).
    #[must_use]
    pub const fn parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = if workers == 0 { 1 } else { workers };
        self
    }

    /// Sets the worker pool close timeout.
    #[must_use]
    pub const fn parallel_close_timeout(mut self, timeout: Duration) -> Self {
        self.parallel_close_timeout = timeout;
        self
    }

    /// Sets the progress logging step, clamped to `1..=100`.
    #[must_use]
    pub const fn progress_report_step_percent(mut self, percent: u8) -> Self {
        self.progress_report_step_percent = if percent == 0 {
            1
        } else if percent > 100 {
            100
        } else {
            percent
        };
        self
    }

    /// Sets the archive directory name.
    #[must_use]
    pub fn archive_dir_name(mut self, name: impl Into<String>) -> Self {
        self.archive_dir_name = name.into();
        self
    }
}

/// Configuration for writing log segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Segment size after which the writer rotates to a new version.
    pub rotation_threshold: u64,

    /// Whether to flush after every appended entry.
    pub sync_on_write: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            rotation_threshold: 256 * 1024 * 1024, // 256 MB
            sync_on_write: false,
        }
    }
}

impl LogConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rotation threshold.
    #[must_use]
    pub const fn rotation_threshold(mut self, bytes: u64) -> Self {
        self.rotation_threshold = bytes;
        self
    }

    /// Sets whether to flush after every appended entry.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RecoveryConfig::default();
        assert!(config.fail_on_corrupted_logs);
        assert!(config.fail_on_missing_logs);
        assert!(!config.parallel_recovery);
        assert!(config.parallel_workers >= 1);
        assert_eq!(config.parallel_close_timeout, Duration::from_secs(60));
        assert_eq!(config.progress_report_step_percent, 10);
        assert_eq!(config.archive_dir_name, "corrupted-tx-logs");
    }

    #[test]
    fn builder_pattern() {
        let config = RecoveryConfig::new()
            .fail_on_corrupted_logs(false)
            .parallel_recovery(true)
            .parallel_workers(0)
            .progress_report_step_percent(250)
            .archive_dir_name("quarantine");

        assert!(!config.fail_on_corrupted_logs);
        assert!(config.parallel_recovery);
        assert_eq!(config.parallel_workers, 1);
        assert_eq!(config.progress_report_step_percent, 100);
        assert_eq!(config.archive_dir_name, "quarantine");
    }

    #[test]
    fn log_config_builder() {
        let config = LogConfig::new().rotation_threshold(4096).sync_on_write(true);
        assert_eq!(config.rotation_threshold, 4096);
        assert!(config.sync_on_write);
    }
}
