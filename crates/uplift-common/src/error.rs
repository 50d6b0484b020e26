//! Error types for uplift.
//!
//! Every public update operation returns [`Error`]. Each variant carries:
//! - a stable numeric code, grouped by category
//! - a category for coarse grouping in front ends
//! - a recoverability hint (may the caller simply retry?)
//!
//! Machine consumers get the same information as JSON through
//! [`ErrorReport`]:
//! ```json
//! {
//!   "code": 30,
//!   "category": "integrity",
//!   "kind": "checksum_mismatch",
//!   "message": "checksum mismatch for app/main.py: expected ab12.., got 9f00..",
//!   "recoverable": true
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for uplift operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration loading and validation.
    Config,
    /// Talking to the remote release source.
    Remote,
    /// Release content integrity.
    Integrity,
    /// Lifecycle preconditions (locks, disabled, nothing staged).
    Lifecycle,
    /// Persisted state and backup snapshot problems.
    State,
    /// Local filesystem and serialization.
    Io,
    /// Requesting the process restart.
    Restart,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Remote => write!(f, "remote"),
            ErrorCategory::Integrity => write!(f, "integrity"),
            ErrorCategory::Lifecycle => write!(f, "lifecycle"),
            ErrorCategory::State => write!(f, "state"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Restart => write!(f, "restart"),
        }
    }
}

/// Why updates are currently refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledReason {
    /// `enabled = false` in the configuration.
    Config,
    /// The consecutive failure counter reached its limit.
    FailureLimit,
    /// A rollback could not restore the backup snapshot.
    RestoreFailed,
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisabledReason::Config => write!(f, "disabled in configuration"),
            DisabledReason::FailureLimit => write!(f, "too many consecutive failed updates"),
            DisabledReason::RestoreFailed => write!(f, "last rollback could not restore the backup"),
        }
    }
}

/// Unified error type for uplift.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    // Remote errors (20-29)
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("remote source error: {0}")]
    Remote(String),

    #[error("invalid version {input:?}: {reason}")]
    VersionParse { input: String, reason: String },

    // Integrity errors (30-39)
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("required file missing from release: {path}")]
    MissingRequiredFile { path: String },

    // Lifecycle errors (40-49)
    #[error("another update operation is in progress: {operation}")]
    OperationInProgress { operation: String },

    #[error("updates are disabled: {reason}")]
    UpdatesDisabled { reason: DisabledReason },

    #[error("no update available (local {local}, available {available})")]
    NoUpdateAvailable { local: String, available: String },

    #[error("nothing staged: {0}")]
    NothingStaged(String),

    #[error("no backup available: {0}")]
    NoBackup(String),

    #[error("operation cancelled")]
    Cancelled,

    // State errors (50-59)
    #[error("update state at {path} is corrupt: {reason}")]
    StateCorruption { path: PathBuf, reason: String },

    #[error("restoring backup failed: {0}")]
    RestoreFailed(String),

    // I/O errors (60-69)
    #[error("disk error at {path}: {source}")]
    Disk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Restart errors (70-79)
    #[error("restart request failed: {0}")]
    Restart(String),
}

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub fn disk(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Disk {
            path: path.into(),
            source,
        }
    }

    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Remote errors
    /// - 30-39: Integrity errors
    /// - 40-49: Lifecycle errors
    /// - 50-59: State errors
    /// - 60-69: I/O errors
    /// - 70-79: Restart errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,

            Error::Network { .. } => 20,
            Error::Remote(_) => 21,
            Error::VersionParse { .. } => 22,

            Error::ChecksumMismatch { .. } => 30,
            Error::MissingRequiredFile { .. } => 31,

            Error::OperationInProgress { .. } => 40,
            Error::UpdatesDisabled { .. } => 41,
            Error::NoUpdateAvailable { .. } => 42,
            Error::NothingStaged(_) => 43,
            Error::NoBackup(_) => 44,
            Error::Cancelled => 45,

            Error::StateCorruption { .. } => 50,
            Error::RestoreFailed(_) => 51,

            Error::Disk { .. } => 60,
            Error::Io(_) => 61,
            Error::Json(_) => 62,

            Error::Restart(_) => 70,
        }
    }

    /// Returns the category for this error.
    pub fn category(&self) -> ErrorCategory {
        match self.code() {
            10..=19 => ErrorCategory::Config,
            20..=29 => ErrorCategory::Remote,
            30..=39 => ErrorCategory::Integrity,
            40..=49 => ErrorCategory::Lifecycle,
            50..=59 => ErrorCategory::State,
            60..=69 => ErrorCategory::Io,
            _ => ErrorCategory::Restart,
        }
    }

    /// Stable snake_case name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Network { .. } => "network",
            Error::Remote(_) => "remote",
            Error::VersionParse { .. } => "version_parse",
            Error::ChecksumMismatch { .. } => "checksum_mismatch",
            Error::MissingRequiredFile { .. } => "missing_required_file",
            Error::OperationInProgress { .. } => "operation_in_progress",
            Error::UpdatesDisabled { .. } => "updates_disabled",
            Error::NoUpdateAvailable { .. } => "no_update_available",
            Error::NothingStaged(_) => "nothing_staged",
            Error::NoBackup(_) => "no_backup",
            Error::Cancelled => "cancelled",
            Error::StateCorruption { .. } => "state_corruption",
            Error::RestoreFailed(_) => "restore_failed",
            Error::Disk { .. } => "disk",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Restart(_) => "restart",
        }
    }

    /// Returns whether the caller may retry the same operation as is.
    ///
    /// Check and download failures are retryable. State corruption, a
    /// failed restore and the disabled circuit breaker need an operator.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Network { .. }
            | Error::Remote(_)
            | Error::ChecksumMismatch { .. }
            | Error::MissingRequiredFile { .. }
            | Error::OperationInProgress { .. }
            | Error::Cancelled
            | Error::Restart(_) => true,

            Error::Disk { .. } | Error::Io(_) => true,

            Error::Config(_)
            | Error::VersionParse { .. }
            | Error::UpdatesDisabled { .. }
            | Error::NoUpdateAvailable { .. }
            | Error::NothingStaged(_)
            | Error::NoBackup(_)
            | Error::StateCorruption { .. }
            | Error::RestoreFailed(_)
            | Error::Json(_) => false,
        }
    }

    /// Build the structured report for JSON output.
    pub fn report(&self) -> ErrorReport {
        ErrorReport::from(self)
    }
}

/// Structured error for JSON output and for the last-result slot of the
/// status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Variant name.
    pub kind: String,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,
}

impl From<&Error> for ErrorReport {
    fn from(err: &Error) -> Self {
        ErrorReport {
            code: err.code(),
            category: err.category(),
            kind: err.kind().to_string(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

impl ErrorReport {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}
