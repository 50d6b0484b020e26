//! Structured event definitions for logging.
//!
//! Every event carries the correlation IDs from [`LogContext`] and a
//! [`Stage`], and uses one of the stable names in [`event_names`] as its
//! tracing target.

use serde::{Deserialize, Serialize};

/// Log levels for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Stages of the update lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup, configuration and startup health evaluation.
    Init,
    /// Remote version check.
    Check,
    /// Fetching and staging a release.
    Download,
    /// Snapshotting the live tree.
    Backup,
    /// Replacing live files.
    Apply,
    /// Verification window and confirm.
    Verify,
    /// Restoring the backup snapshot.
    Rollback,
    /// Periodic background checks.
    Schedule,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Check => "check",
            Stage::Download => "download",
            Stage::Backup => "backup",
            Stage::Apply => "apply",
            Stage::Verify => "verify",
            Stage::Rollback => "rollback",
            Stage::Schedule => "schedule",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Init
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const STATE_LOADED: &str = "state.loaded";
    pub const STATE_CORRUPT: &str = "state.corrupt";
    pub const STARTUP_EVALUATED: &str = "health.startup_evaluated";
    pub const STARTUP_FAILED: &str = "health.startup_failed";
    pub const SERVICE_STARTED: &str = "service.started";
    pub const SERVICE_STOPPED: &str = "service.stopped";

    // Check
    pub const CHECK_STARTED: &str = "check.started";
    pub const CHECK_FINISHED: &str = "check.finished";
    pub const CHECK_FAILED: &str = "check.failed";

    // Download
    pub const DOWNLOAD_STARTED: &str = "download.started";
    pub const DOWNLOAD_FILE_VERIFIED: &str = "download.file_verified";
    pub const DOWNLOAD_FILE_SKIPPED: &str = "download.file_skipped";
    pub const DOWNLOAD_STAGED: &str = "download.staged";
    pub const DOWNLOAD_ABORTED: &str = "download.aborted";

    // Backup
    pub const BACKUP_STARTED: &str = "backup.started";
    pub const BACKUP_SNAPSHOT_TAKEN: &str = "apply.snapshot_taken";

    // Apply
    pub const APPLY_STARTED: &str = "apply.started";
    pub const APPLY_FILE_DELETED: &str = "apply.file_deleted";
    pub const APPLY_FINISHED: &str = "apply.finished";
    pub const APPLY_FAILED: &str = "apply.failed";
    pub const RESTART_REQUESTED: &str = "restart.requested";
    pub const RESTART_FAILED: &str = "restart.failed";

    // Verify
    pub const VERIFY_WINDOW_OPENED: &str = "health.verification_window";
    pub const VERIFY_CONFIRMED: &str = "health.confirmed";
    pub const VERIFY_CONFIRM_FAILED: &str = "health.confirm_failed";

    // Rollback
    pub const ROLLBACK_TRIGGERED: &str = "health.rollback_triggered";
    pub const ROLLBACK_FINISHED: &str = "health.rollback_finished";
    pub const ROLLBACK_RESTORE_FAILED: &str = "health.restore_failed";
    pub const UPDATES_DISABLED: &str = "health.updates_disabled";
    pub const UPDATES_ENABLED: &str = "health.updates_enabled";

    // Schedule
    pub const SCHEDULE_CYCLE: &str = "schedule.cycle";
    pub const SCHEDULE_STOPPED: &str = "schedule.stopped";
}

/// Correlation IDs threaded into every component.
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Unique ID for this process invocation.
    pub run_id: String,
    /// ID of the asynchronous operation being logged, if any.
    pub operation_id: Option<String>,
    /// Host identifier.
    pub host_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            operation_id: None,
            host_id: host_id.into(),
        }
    }

    /// Context for one asynchronous operation.
    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }
}
