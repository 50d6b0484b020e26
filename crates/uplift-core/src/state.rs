//! Durable update state.
//!
//! The state record is a single JSON document under the state directory.
//! Writes go through a temporary file, fsync and rename, so a crash leaves
//! either the previous or the next record, never a torn one. A record that
//! fails to decode or breaks the lifecycle invariants is reported as
//! `StateCorruption` and is never silently replaced with defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use uplift_common::{DisabledReason, Error, Result, Version, STATE_SCHEMA_VERSION};

use crate::fsutil;
use crate::layout::UpdatePaths;
use crate::lock::FileLock;
use crate::logging::{event_names, LogContext, Stage};

/// Lifecycle phase of the update state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Downloading,
    Staged,
    Applying,
    PendingVerification,
    RollingBack,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Downloading => "downloading",
            Phase::Staged => "staged",
            Phase::Applying => "applying",
            Phase::PendingVerification => "pending_verification",
            Phase::RollingBack => "rolling_back",
        };
        write!(f, "{}", s)
    }
}

/// Persisted update state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateState {
    pub schema_version: String,

    /// Version the live tree is believed to hold.
    pub current_version: Version,

    /// Latest version reported by the remote at the last check.
    pub available_version: Option<Version>,

    /// Version held by the staging area, if any.
    pub staged_version: Option<Version>,

    pub phase: Phase,

    /// True strictly between a successful apply and confirm/rollback.
    pub pending_verification: bool,

    /// Process starts observed while verification was pending.
    pub verification_starts: u32,

    pub consecutive_failures: u32,

    pub updates_disabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<DisabledReason>,

    /// Version captured by the backup snapshot.
    pub backup_version: Option<Version>,

    pub last_check: Option<DateTime<Utc>>,

    pub last_update: Option<DateTime<Utc>>,

    pub last_error: Option<String>,
}

impl Default for UpdateState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION.to_string(),
            current_version: Version::default(),
            available_version: None,
            staged_version: None,
            phase: Phase::Idle,
            pending_verification: false,
            verification_starts: 0,
            consecutive_failures: 0,
            updates_disabled: false,
            disabled_reason: None,
            backup_version: None,
            last_check: None,
            last_update: None,
            last_error: None,
        }
    }
}

impl UpdateState {
    /// Fresh state for a live tree at `current_version`.
    pub fn initial(current_version: Version) -> Self {
        Self {
            current_version,
            ..Self::default()
        }
    }

    /// Lifecycle invariants every persisted record must satisfy.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let major = self.schema_version.split('.').next().unwrap_or_default();
        let expected_major = STATE_SCHEMA_VERSION.split('.').next().unwrap_or_default();
        if major != expected_major {
            return Err(format!(
                "unsupported schema_version {:?} (expected {}.x)",
                self.schema_version, expected_major
            ));
        }
        if self.pending_verification != (self.phase == Phase::PendingVerification) {
            return Err(format!(
                "pending_verification={} contradicts phase {}",
                self.pending_verification, self.phase
            ));
        }
        if self.verification_starts > 0 && !self.pending_verification {
            return Err("verification_starts set without pending verification".to_string());
        }
        if self.phase == Phase::Staged && self.staged_version.is_none() {
            return Err("phase staged without staged_version".to_string());
        }
        if self.disabled_reason.is_some() && !self.updates_disabled {
            return Err("disabled_reason set while updates are enabled".to_string());
        }
        Ok(())
    }

    /// Refuse when the configuration or the circuit breaker disables updates.
    pub fn ensure_enabled(&self, config_enabled: bool) -> Result<()> {
        if !config_enabled {
            return Err(Error::UpdatesDisabled {
                reason: DisabledReason::Config,
            });
        }
        if self.updates_disabled {
            return Err(Error::UpdatesDisabled {
                reason: self.disabled_reason.unwrap_or(DisabledReason::FailureLimit),
            });
        }
        Ok(())
    }

    /// Count one failed update. The counter saturates at `max_failures`,
    /// and reaching it disables updates. Returns whether updates are now
    /// disabled.
    pub fn register_failure(&mut self, max_failures: u32) -> bool {
        let max = max_failures.max(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1).min(max);
        if self.consecutive_failures >= max && !self.updates_disabled {
            self.updates_disabled = true;
            self.disabled_reason = Some(DisabledReason::FailureLimit);
        }
        self.updates_disabled
    }

    /// Force the circuit breaker open after an unrecoverable restore.
    pub fn disable(&mut self, reason: DisabledReason) {
        self.updates_disabled = true;
        self.disabled_reason = Some(reason);
    }

    /// Clear the circuit breaker.
    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
        self.updates_disabled = false;
        self.disabled_reason = None;
    }
}

/// Read the live tree's version file. A missing file reads as `0.0.0`.
pub fn read_local_version(path: &Path) -> Result<Version> {
    match std::fs::read_to_string(path) {
        Ok(text) => Version::parse(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Version::default()),
        Err(e) => Err(Error::disk(path, e)),
    }
}

/// Load/save access to the state record.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
    version_file: PathBuf,
    guard: Mutex<()>,
    ctx: LogContext,
}

impl StateStore {
    pub fn new(paths: &UpdatePaths, ctx: LogContext) -> Self {
        Self {
            path: paths.state_file(),
            lock_path: paths.state_lock_file(),
            version_file: paths.version_file.clone(),
            guard: Mutex::new(()),
            ctx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record. A missing file yields a fresh state for the local
    /// version.
    pub fn load(&self) -> Result<UpdateState> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(self.initial_state());
            }
            Err(e) => return Err(Error::disk(&self.path, e)),
        };

        let state: UpdateState = serde_json::from_slice(&bytes).map_err(|e| {
            self.corrupt(format!("cannot decode: {}", e))
        })?;
        state.check_invariants().map_err(|reason| self.corrupt(reason))?;
        Ok(state)
    }

    /// Durably write the record.
    pub fn save(&self, state: &UpdateState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        fsutil::write_atomic(&self.path, &json)
    }

    /// Read-modify-write under the in-process mutex and `state.lock`.
    ///
    /// The record is saved only when `f` succeeds.
    pub fn update<T>(&self, f: impl FnOnce(&mut UpdateState) -> Result<T>) -> Result<T> {
        let _guard = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        let _lock = FileLock::acquire(&self.lock_path)?;

        let mut state = self.load()?;
        let out = f(&mut state)?;
        state
            .check_invariants()
            .map_err(|reason| Error::StateCorruption {
                path: self.path.clone(),
                reason: format!("refusing to persist inconsistent state: {}", reason),
            })?;
        self.save(&state)?;
        Ok(out)
    }

    /// Best-effort record of the latest error for status reporting.
    pub fn record_error(&self, err: &Error) {
        let message = err.to_string();
        let _ = self.update(|s| {
            s.last_error = Some(message);
            Ok(())
        });
    }

    fn initial_state(&self) -> UpdateState {
        let version = match read_local_version(&self.version_file) {
            Ok(v) => v,
            Err(e) => {
                crate::log_event!(
                    self.ctx,
                    WARN,
                    event_names::STATE_LOADED,
                    Stage::Init,
                    "local version unreadable, assuming 0.0.0",
                    error = %e
                );
                Version::default()
            }
        };
        UpdateState::initial(version)
    }

    fn corrupt(&self, reason: String) -> Error {
        crate::log_event!(
            self.ctx,
            ERROR,
            event_names::STATE_CORRUPT,
            Stage::Init,
            "update state is corrupt",
            path = %self.path.display(),
            reason = %reason
        );
        Error::StateCorruption {
            path: self.path.clone(),
            reason,
        }
    }
}
