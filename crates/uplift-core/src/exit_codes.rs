//! Exit codes for the `uplift` CLI.
//!
//! Exit codes communicate the outcome without requiring output parsing.
//!
//! Exit code ranges:
//! - 0-2: Operational outcomes
//! - 10-19: User/environment errors (resolved by operator action)
//! - 20-29: Remote, integrity and internal errors

use uplift_common::Error;

/// Exit codes for uplift operations.
///
/// These codes are a stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-2)
    // ========================================================================
    /// Success, nothing further to do
    Ok = 0,

    /// `check` found a newer release
    UpdateAvailable = 1,

    /// A rollback ran (startup evaluation or operator request)
    RolledBack = 2,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments or configuration
    ConfigError = 10,

    /// Another update operation holds the lock
    LockError = 11,

    /// Updates disabled by configuration or the failure limit
    DisabledError = 12,

    /// Precondition not met (no update, nothing staged, no backup)
    PreconditionError = 13,

    /// Operation cancelled
    Cancelled = 14,

    // ========================================================================
    // Remote / Integrity / Internal Errors (20-29)
    // ========================================================================
    /// Remote source unreachable or malformed
    RemoteError = 20,

    /// Release content failed verification
    IntegrityError = 21,

    /// Persisted state corrupt or backup unusable
    StateError = 22,

    /// Local filesystem error
    IoError = 23,

    /// Restart request failed
    RestartError = 24,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Codes 0-2 are outcomes, not errors.
    pub fn is_operational(self) -> bool {
        (self as i32) < 10
    }

    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Stable name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Ok => "OK",
            ExitCode::UpdateAvailable => "OK_UPDATE_AVAILABLE",
            ExitCode::RolledBack => "OK_ROLLED_BACK",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::LockError => "ERR_LOCK",
            ExitCode::DisabledError => "ERR_DISABLED",
            ExitCode::PreconditionError => "ERR_PRECONDITION",
            ExitCode::Cancelled => "ERR_CANCELLED",
            ExitCode::RemoteError => "ERR_REMOTE",
            ExitCode::IntegrityError => "ERR_INTEGRITY",
            ExitCode::StateError => "ERR_STATE",
            ExitCode::IoError => "ERR_IO",
            ExitCode::RestartError => "ERR_RESTART",
        }
    }

    /// Exit code for a failed operation.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Config(_) => ExitCode::ConfigError,
            Error::Network { .. } | Error::Remote(_) | Error::VersionParse { .. } => {
                ExitCode::RemoteError
            }
            Error::ChecksumMismatch { .. } | Error::MissingRequiredFile { .. } => {
                ExitCode::IntegrityError
            }
            Error::OperationInProgress { .. } => ExitCode::LockError,
            Error::UpdatesDisabled { .. } => ExitCode::DisabledError,
            Error::NoUpdateAvailable { .. } | Error::NothingStaged(_) | Error::NoBackup(_) => {
                ExitCode::PreconditionError
            }
            Error::Cancelled => ExitCode::Cancelled,
            Error::StateCorruption { .. } | Error::RestoreFailed(_) => ExitCode::StateError,
            Error::Disk { .. } | Error::Io(_) | Error::Json(_) => ExitCode::IoError,
            Error::Restart(_) => ExitCode::RestartError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        ExitCode::from_error(err)
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
