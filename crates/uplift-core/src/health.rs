//! HealthMonitor: startup evaluation, confirm, rollback and the failure
//! circuit breaker.
//!
//! Restart detection relies on the persisted `verification_starts` counter:
//! the first start after an apply opens the verification window, any later
//! start that finds verification still pending means the release did not
//! survive the window and is rolled back.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use uplift_common::{DisabledReason, Error, Result, Version};
use uplift_config::UpdateConfig;

use crate::backup::BackupVault;
use crate::fsutil;
use crate::layout::UpdatePaths;
use crate::logging::{event_names, LogContext, Stage};
use crate::restart::{request_restart, RestartOutcome, RestartTrigger};
use crate::state::{Phase, StateStore};

const MAX_WINDOW_SECS: u64 = 7 * 24 * 3600;

/// Why a rollback ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackCause {
    /// Restarted again before the verification window closed.
    RestartedDuringVerification,
    /// A previous apply stopped part-way.
    InterruptedApply,
    /// A previous rollback stopped part-way.
    InterruptedRollback,
    /// Requested by an operator.
    Manual,
}

impl RollbackCause {
    pub fn describe(&self) -> &'static str {
        match self {
            RollbackCause::RestartedDuringVerification => {
                "process restarted before the verification window closed"
            }
            RollbackCause::InterruptedApply => "previous apply was interrupted",
            RollbackCause::InterruptedRollback => "previous rollback was interrupted",
            RollbackCause::Manual => "requested by operator",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    pub cause: RollbackCause,
    pub restored_version: Version,
    pub consecutive_failures: u32,
    pub updates_disabled: bool,
    pub restart: RestartOutcome,
}

/// Result of the startup evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum StartupVerdict {
    /// Nothing to verify.
    Idle,
    /// The new release must keep running until `deadline`.
    VerificationWindow {
        version: Version,
        deadline: DateTime<Utc>,
    },
    RolledBack(RollbackReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Confirmed(Version),
    AlreadyConfirmed,
}

pub struct HealthMonitor<'a> {
    store: &'a StateStore,
    paths: &'a UpdatePaths,
    config: &'a UpdateConfig,
    restart: &'a dyn RestartTrigger,
    ctx: &'a LogContext,
}

impl<'a> HealthMonitor<'a> {
    pub fn new(
        store: &'a StateStore,
        paths: &'a UpdatePaths,
        config: &'a UpdateConfig,
        restart: &'a dyn RestartTrigger,
        ctx: &'a LogContext,
    ) -> Self {
        Self {
            store,
            paths,
            config,
            restart,
            ctx,
        }
    }

    fn max_failures(&self) -> u32 {
        self.config.max_consecutive_failures.max(1)
    }

    /// Evaluate persisted state once per process start.
    ///
    /// A corrupt state record is returned as an error and nothing is
    /// changed.
    pub fn on_startup(&self) -> Result<StartupVerdict> {
        let state = self.store.load()?;
        crate::log_event!(
            self.ctx,
            INFO,
            event_names::STARTUP_EVALUATED,
            Stage::Init,
            "evaluating update state at startup",
            phase = %state.phase,
            pending = state.pending_verification,
            starts = state.verification_starts
        );

        match state.phase {
            Phase::Applying => {
                return self
                    .rollback_with(RollbackCause::InterruptedApply)
                    .map(StartupVerdict::RolledBack)
            }
            Phase::RollingBack => {
                return self
                    .rollback_with(RollbackCause::InterruptedRollback)
                    .map(StartupVerdict::RolledBack)
            }
            Phase::Downloading => {
                fsutil::remove_dir_if_exists(&self.paths.staging_partial_dir())?;
                let staged = self.paths.staging_dir().is_dir();
                self.store.update(|s| {
                    if s.phase == Phase::Downloading {
                        s.phase = if staged && s.staged_version.is_some() {
                            Phase::Staged
                        } else {
                            s.staged_version = None;
                            Phase::Idle
                        };
                    }
                    Ok(())
                })?;
                return Ok(StartupVerdict::Idle);
            }
            _ => {}
        }

        if !state.pending_verification {
            return Ok(StartupVerdict::Idle);
        }

        if state.verification_starts == 0 {
            let secs = self.config.verification_window_secs.min(MAX_WINDOW_SECS);
            let deadline = Utc::now() + Duration::seconds(secs as i64);
            self.store.update(|s| {
                s.verification_starts = 1;
                Ok(())
            })?;
            crate::log_event!(
                self.ctx,
                INFO,
                event_names::VERIFY_WINDOW_OPENED,
                Stage::Verify,
                "verification window opened",
                version = %state.current_version,
                window_secs = self.config.verification_window_secs
            );
            return Ok(StartupVerdict::VerificationWindow {
                version: state.current_version,
                deadline,
            });
        }

        self.rollback_with(RollbackCause::RestartedDuringVerification)
            .map(StartupVerdict::RolledBack)
    }

    /// Accept the pending release. A second confirm changes nothing.
    pub fn confirm(&self) -> Result<ConfirmOutcome> {
        let outcome = self.store.update(|s| {
            if !s.pending_verification {
                return Ok(ConfirmOutcome::AlreadyConfirmed);
            }
            s.pending_verification = false;
            s.verification_starts = 0;
            s.phase = Phase::Idle;
            s.consecutive_failures = 0;
            s.staged_version = None;
            s.last_update = Some(Utc::now());
            s.last_error = None;
            Ok(ConfirmOutcome::Confirmed(s.current_version))
        })?;

        if let ConfirmOutcome::Confirmed(version) = outcome {
            fsutil::remove_dir_if_exists(&self.paths.staging_dir())?;
            crate::log_event!(
                self.ctx,
                INFO,
                event_names::VERIFY_CONFIRMED,
                Stage::Verify,
                "update confirmed",
                version = %version
            );
        }
        Ok(outcome)
    }

    /// Operator-requested rollback. Allowed while updates are disabled.
    pub fn rollback(&self) -> Result<RollbackReport> {
        self.rollback_with(RollbackCause::Manual)
    }

    /// Nothing to fall back to: leave verification and disable updates
    /// until an operator intervenes.
    fn restore_failed(&self, e: Error) -> Error {
        crate::log_event!(
            self.ctx,
            ERROR,
            event_names::ROLLBACK_RESTORE_FAILED,
            Stage::Rollback,
            "backup restore failed, updates disabled",
            error = %e
        );
        let message = e.to_string();
        let _ = self.store.update(|s| {
            s.disable(DisabledReason::RestoreFailed);
            s.phase = Phase::Idle;
            s.pending_verification = false;
            s.verification_starts = 0;
            s.last_error = Some(message);
            Ok(())
        });
        e
    }

    /// An operator asking for a rollback that never had an apply gets a
    /// plain `NoBackup`. Automatic rollbacks cannot skip restoring.
    fn missing_snapshot(&self, cause: RollbackCause, reason: String) -> Error {
        if cause == RollbackCause::Manual {
            return Error::NoBackup(reason);
        }
        self.restore_failed(Error::RestoreFailed(format!(
            "{}: {}",
            cause.describe(),
            reason
        )))
    }

    fn rollback_with(&self, cause: RollbackCause) -> Result<RollbackReport> {
        let vault = BackupVault::new(self.store, self.paths, self.ctx);
        let state = self.store.load()?;
        let backup_version = match state.backup_version {
            Some(version) if vault.exists() => version,
            Some(_) => {
                let reason = format!("{} holds no snapshot", self.paths.backup_dir().display());
                return Err(self.missing_snapshot(cause, reason));
            }
            None => {
                return Err(self.missing_snapshot(cause, "no backup version recorded".to_string()))
            }
        };

        let max = self.max_failures();
        let counts = cause != RollbackCause::InterruptedRollback;
        let (failures, disabled, was_disabled) = self.store.update(|s| {
            let was_disabled = s.updates_disabled;
            if counts {
                s.register_failure(max);
            }
            s.phase = Phase::RollingBack;
            s.pending_verification = false;
            s.verification_starts = 0;
            Ok((s.consecutive_failures, s.updates_disabled, was_disabled))
        })?;

        crate::log_event!(
            self.ctx,
            WARN,
            event_names::ROLLBACK_TRIGGERED,
            Stage::Rollback,
            "rolling back to backup",
            cause = ?cause,
            restore_to = %backup_version,
            consecutive_failures = failures
        );

        if let Err(e) = vault.restore() {
            return Err(self.restore_failed(e));
        }

        if !self.paths.version_file.starts_with(&self.paths.live_dir) {
            fsutil::write_atomic(
                &self.paths.version_file,
                format!("{}\n", backup_version).as_bytes(),
            )?;
        }

        let cause_text = format!("rolled back to {}: {}", backup_version, cause.describe());
        self.store.update(|s| {
            s.current_version = backup_version;
            s.phase = Phase::Idle;
            s.staged_version = None;
            s.last_error = Some(cause_text);
            Ok(())
        })?;
        fsutil::remove_dir_if_exists(&self.paths.staging_dir())?;

        if disabled && !was_disabled {
            crate::log_event!(
                self.ctx,
                ERROR,
                event_names::UPDATES_DISABLED,
                Stage::Rollback,
                "failure limit reached, updates disabled until enable",
                consecutive_failures = failures,
                max = max
            );
        }
        crate::log_event!(
            self.ctx,
            INFO,
            event_names::ROLLBACK_FINISHED,
            Stage::Rollback,
            "rollback finished",
            restored_version = %backup_version
        );

        let restart = request_restart(self.restart, self.ctx, Stage::Rollback);
        Ok(RollbackReport {
            cause,
            restored_version: backup_version,
            consecutive_failures: failures,
            updates_disabled: disabled,
            restart,
        })
    }

    /// Clear the circuit breaker.
    pub fn enable(&self) -> Result<()> {
        self.store.update(|s| {
            s.reset_failures();
            s.last_error = None;
            Ok(())
        })?;
        crate::log_event!(
            self.ctx,
            INFO,
            event_names::UPDATES_ENABLED,
            Stage::Rollback,
            "updates re-enabled"
        );
        Ok(())
    }
}
