//! The update manager: one entry point per operation, mutual exclusion, and
//! the status report.
//!
//! Mutating operations (download, apply, confirm, rollback, enable, startup)
//! hold an in-process slot plus the cross-process `update.lock` for their
//! whole run. A second attempt fails fast with `OperationInProgress`.
//! Download and apply can also run on a worker thread; their progress and
//! outcome are visible through [`UpdateManager::status`], which never waits
//! on a running operation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use uplift_common::{DisabledReason, Error, ErrorReport, Result, Version};
use uplift_config::UpdateConfig;

use crate::apply::{ApplyEngine, ApplyReport};
use crate::backup::BackupVault;
use crate::health::{ConfirmOutcome, HealthMonitor, RollbackReport, StartupVerdict};
use crate::layout::UpdatePaths;
use crate::lock::FileLock;
use crate::logging::LogContext;
use crate::operation::{
    CancelToken, OperationKind, OperationProgress, OperationResult, ProgressSnapshot,
};
use crate::remote::{Remote, RemoteSource};
use crate::resolver::{CheckOutcome, VersionResolver};
use crate::restart::{RestartTrigger, Restarter};
use crate::stager::{DownloadStager, StageReport};
use crate::state::{read_local_version, Phase, StateStore, UpdateState};

#[derive(Debug, Clone)]
struct ActiveOperation {
    id: String,
    kind: OperationKind,
    started_at: DateTime<Utc>,
    progress: Arc<OperationProgress>,
    cancel: CancelToken,
}

/// The in-flight operation as shown by status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationStatus {
    pub id: String,
    pub kind: OperationKind,
    pub started_at: DateTime<Utc>,
    pub progress: ProgressSnapshot,
}

/// Everything a front end needs to render the update subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// Version in the local version file.
    pub current_version: Option<Version>,
    /// Version recorded in the state record.
    pub recorded_version: Option<Version>,
    pub available_version: Option<Version>,
    /// `update_available`, `up_to_date`, `local_ahead` or `unknown`.
    pub version_comparison: String,
    pub update_available: bool,
    pub staged_version: Option<Version>,
    pub phase: Option<Phase>,
    pub pending_verification: bool,
    pub consecutive_failures: u32,
    pub max_consecutive_failures: u32,
    pub updates_disabled: bool,
    pub disabled_reason: Option<DisabledReason>,
    /// The configuration kill switch.
    pub updates_enabled: bool,
    pub backup_version: Option<Version>,
    pub can_rollback: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set when the state record cannot be read.
    pub state_error: Option<ErrorReport>,
    pub source: String,
    pub restart: String,
    pub operation: Option<OperationStatus>,
    pub last_result: Option<OperationResult>,
}

struct Inner {
    config: UpdateConfig,
    paths: UpdatePaths,
    store: StateStore,
    remote: Arc<dyn RemoteSource>,
    restart: Arc<dyn RestartTrigger>,
    ctx: LogContext,
    active: Mutex<Option<ActiveOperation>>,
    last_result: Mutex<Option<OperationResult>>,
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// Holds the operation slot and `update.lock` until dropped.
struct OperationGuard {
    inner: Arc<Inner>,
    op: ActiveOperation,
    _lock: FileLock,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut active = lock_ignoring_poison(&self.inner.active);
        if active.as_ref().map(|op| op.id.as_str()) == Some(self.op.id.as_str()) {
            *active = None;
        }
    }
}

/// Handle to an operation running on a worker thread.
pub struct OperationHandle {
    pub id: String,
    pub kind: OperationKind,
    handle: JoinHandle<OperationResult>,
}

impl OperationHandle {
    /// Wait for the operation to finish.
    pub fn join(self) -> Result<OperationResult> {
        self.handle
            .join()
            .map_err(|_| Error::Io(std::io::Error::other("operation thread panicked")))
    }
}

fn new_operation_id() -> String {
    format!("op-{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

#[derive(Clone)]
pub struct UpdateManager {
    inner: Arc<Inner>,
}

impl UpdateManager {
    pub fn new(
        config: UpdateConfig,
        remote: Arc<dyn RemoteSource>,
        restart: Arc<dyn RestartTrigger>,
        ctx: LogContext,
    ) -> Self {
        let paths = UpdatePaths::from_config(&config.paths);
        let store = StateStore::new(&paths, ctx.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                paths,
                store,
                remote,
                restart,
                ctx,
                active: Mutex::new(None),
                last_result: Mutex::new(None),
            }),
        }
    }

    /// Manager with the configured remote strategy and restart mechanism.
    pub fn from_config(config: UpdateConfig, ctx: LogContext) -> Self {
        let remote: Arc<dyn RemoteSource> = Arc::new(Remote::from_config(&config));
        let restart: Arc<dyn RestartTrigger> = Arc::new(Restarter::from_config(&config.restart));
        Self::new(config, remote, restart, ctx)
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.inner.config
    }

    pub fn paths(&self) -> &UpdatePaths {
        &self.inner.paths
    }

    pub fn context(&self) -> &LogContext {
        &self.inner.ctx
    }

    /// Compare the local version with the remote's newest.
    pub fn check(&self) -> Result<CheckOutcome> {
        let inner = &self.inner;
        VersionResolver::new(
            inner.remote.as_ref(),
            &inner.store,
            &inner.paths.version_file,
            inner.config.enabled,
            &inner.ctx,
        )
        .check()
    }

    /// Download and stage `target`, or the version found by the last check.
    pub fn download(&self, target: Option<Version>) -> Result<StageReport> {
        let guard = self.begin(OperationKind::Download)?;
        self.inner.run_download(&guard.op, target).0
    }

    /// Start a download on a worker thread.
    pub fn spawn_download(&self, target: Option<Version>) -> Result<OperationHandle> {
        let guard = self.begin(OperationKind::Download)?;
        self.spawn(guard, move |inner, op| inner.run_download(op, target).1)
    }

    /// Abort the running download, if any. Returns whether one was running.
    pub fn cancel_download(&self) -> bool {
        let active = lock_ignoring_poison(&self.inner.active);
        match active.as_ref() {
            Some(op) if op.kind == OperationKind::Download => {
                op.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Install the staged release.
    pub fn apply(&self) -> Result<ApplyReport> {
        let guard = self.begin(OperationKind::Apply)?;
        self.inner.run_apply(&guard.op).0
    }

    /// Start an apply on a worker thread.
    pub fn spawn_apply(&self) -> Result<OperationHandle> {
        let guard = self.begin(OperationKind::Apply)?;
        self.spawn(guard, |inner, op| inner.run_apply(op).1)
    }

    pub fn confirm(&self) -> Result<ConfirmOutcome> {
        let guard = self.begin(OperationKind::Confirm)?;
        self.inner.finish(&guard.op, |ctx| self.inner.health(ctx).confirm(), |o| match o {
            ConfirmOutcome::Confirmed(v) => format!("update to {} confirmed", v),
            ConfirmOutcome::AlreadyConfirmed => "nothing pending, already confirmed".to_string(),
        })
    }

    pub fn rollback(&self) -> Result<RollbackReport> {
        let guard = self.begin(OperationKind::Rollback)?;
        self.inner.finish(&guard.op, |ctx| self.inner.health(ctx).rollback(), |r| {
            format!("rolled back to {}", r.restored_version)
        })
    }

    /// Clear the failure circuit breaker.
    pub fn enable(&self) -> Result<()> {
        let guard = self.begin(OperationKind::Enable)?;
        self.inner.finish(&guard.op, |ctx| self.inner.health(ctx).enable(), |_| {
            "updates enabled".to_string()
        })
    }

    /// Startup health evaluation. Call once per process start.
    pub fn startup(&self) -> Result<StartupVerdict> {
        let guard = self.begin(OperationKind::Startup)?;
        self.inner.finish(&guard.op, |ctx| self.inner.health(ctx).on_startup(), |v| match v {
            StartupVerdict::Idle => "nothing to verify".to_string(),
            StartupVerdict::VerificationWindow { version, deadline } => {
                format!("verifying {} until {}", version, deadline.to_rfc3339())
            }
            StartupVerdict::RolledBack(r) => format!("rolled back to {}", r.restored_version),
        })
    }

    /// Snapshot of versions, lifecycle flags, errors and the running
    /// operation. Never blocks on a running operation.
    pub fn status(&self) -> StatusReport {
        let inner = &self.inner;
        let current_version = read_local_version(&inner.paths.version_file).ok();
        let (state, state_error) = match inner.store.load() {
            Ok(state) => (Some(state), None),
            Err(e) => (None, Some(e.report())),
        };

        let available_version = state.as_ref().and_then(|s| s.available_version);
        let version_comparison = match (current_version, available_version) {
            (Some(local), Some(remote)) => local.compare_remote(&remote).to_string(),
            _ => "unknown".to_string(),
        };
        let backup_version = state.as_ref().and_then(|s| s.backup_version);
        let can_rollback = backup_version.is_some()
            && BackupVault::new(&inner.store, &inner.paths, &inner.ctx).exists();

        let operation = lock_ignoring_poison(&inner.active)
            .as_ref()
            .map(|op| OperationStatus {
                id: op.id.clone(),
                kind: op.kind,
                started_at: op.started_at,
                progress: op.progress.snapshot(),
            });
        let last_result = lock_ignoring_poison(&inner.last_result).clone();

        let last_error = match (&state, &state_error) {
            (Some(s), _) => s.last_error.clone(),
            (None, Some(report)) => Some(report.message.clone()),
            (None, None) => None,
        };

        StatusReport {
            current_version,
            recorded_version: state.as_ref().map(|s| s.current_version),
            available_version,
            update_available: version_comparison == "update_available",
            version_comparison,
            staged_version: state.as_ref().and_then(|s| s.staged_version),
            phase: state.as_ref().map(|s| s.phase),
            pending_verification: state.as_ref().is_some_and(|s| s.pending_verification),
            consecutive_failures: state.as_ref().map_or(0, |s| s.consecutive_failures),
            max_consecutive_failures: inner.config.max_consecutive_failures,
            updates_disabled: state.as_ref().is_some_and(|s| s.updates_disabled),
            disabled_reason: state.as_ref().and_then(|s| s.disabled_reason),
            updates_enabled: inner.config.enabled,
            backup_version,
            can_rollback,
            last_check: state.as_ref().and_then(|s| s.last_check),
            last_update: state.as_ref().and_then(|s| s.last_update),
            last_error,
            state_error,
            source: inner.remote.describe(),
            restart: inner.restart.describe(),
            operation,
            last_result,
        }
    }

    fn begin(&self, kind: OperationKind) -> Result<OperationGuard> {
        let mut active = lock_ignoring_poison(&self.inner.active);
        if let Some(op) = active.as_ref() {
            return Err(Error::OperationInProgress {
                operation: format!("{} ({})", op.kind, op.id),
            });
        }
        self.inner.paths.ensure_state_dir()?;
        let lock = FileLock::try_acquire(&self.inner.paths.op_lock_file(), kind.as_str())?;

        let op = ActiveOperation {
            id: new_operation_id(),
            kind,
            started_at: Utc::now(),
            progress: Arc::new(OperationProgress::default()),
            cancel: CancelToken::new(),
        };
        *active = Some(op.clone());
        Ok(OperationGuard {
            inner: Arc::clone(&self.inner),
            op,
            _lock: lock,
        })
    }

    fn spawn<F>(&self, guard: OperationGuard, work: F) -> Result<OperationHandle>
    where
        F: FnOnce(&Inner, &ActiveOperation) -> OperationResult + Send + 'static,
    {
        let id = guard.op.id.clone();
        let kind = guard.op.kind;
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name(format!("uplift-{}", kind))
            .spawn(move || {
                let result = work(inner.as_ref(), &guard.op);
                drop(guard);
                result
            })
            .map_err(Error::Io)?;
        Ok(OperationHandle { id, kind, handle })
    }
}

impl Inner {
    fn op_context(&self, op: &ActiveOperation) -> LogContext {
        self.ctx.clone().with_operation_id(op.id.clone())
    }

    fn health<'a>(&'a self, ctx: &'a LogContext) -> HealthMonitor<'a> {
        HealthMonitor::new(
            &self.store,
            &self.paths,
            &self.config,
            self.restart.as_ref(),
            ctx,
        )
    }

    /// Run `f` with the operation's log context and record its outcome.
    fn finish<T: Serialize>(
        &self,
        op: &ActiveOperation,
        f: impl FnOnce(&LogContext) -> Result<T>,
        message: impl FnOnce(&T) -> String,
    ) -> Result<T> {
        self.record(op, f, message).0
    }

    fn record<T: Serialize>(
        &self,
        op: &ActiveOperation,
        f: impl FnOnce(&LogContext) -> Result<T>,
        message: impl FnOnce(&T) -> String,
    ) -> (Result<T>, OperationResult) {
        let ctx = self.op_context(op);
        let outcome = f(&ctx);
        let result = match &outcome {
            Ok(value) => OperationResult::success(
                op.id.clone(),
                op.kind,
                message(value),
                serde_json::to_value(value).ok(),
            ),
            Err(e) => OperationResult::failure(op.id.clone(), op.kind, e),
        };
        *lock_ignoring_poison(&self.last_result) = Some(result.clone());
        (outcome, result)
    }

    /// The version to download. Refusals are recorded as the last error.
    fn resolve_target(&self, target: Option<Version>) -> Result<Version> {
        let state = self.store.load()?;
        let resolved = self.pick_target(&state, target);
        if let Err(e) = &resolved {
            self.store.record_error(e);
        }
        resolved
    }

    fn pick_target(&self, state: &UpdateState, target: Option<Version>) -> Result<Version> {
        state.ensure_enabled(self.config.enabled)?;
        if let Some(target) = target {
            return Ok(target);
        }
        let local = read_local_version(&self.paths.version_file)?;
        match state.available_version {
            Some(available) if available > local => Ok(available),
            Some(available) => Err(Error::NoUpdateAvailable {
                local: local.to_string(),
                available: available.to_string(),
            }),
            None => Err(Error::NoUpdateAvailable {
                local: local.to_string(),
                available: "unknown (run check first)".to_string(),
            }),
        }
    }

    fn run_download(
        &self,
        op: &ActiveOperation,
        target: Option<Version>,
    ) -> (Result<StageReport>, OperationResult) {
        self.record(
            op,
            |ctx| {
                let target = self.resolve_target(target)?;
                DownloadStager::new(self.remote.as_ref(), &self.store, &self.paths, &self.config, ctx)
                    .download(target, &op.cancel, &op.progress)
            },
            |r| format!("staged {} ({} files)", r.version, r.files),
        )
    }

    fn run_apply(&self, op: &ActiveOperation) -> (Result<ApplyReport>, OperationResult) {
        self.record(
            op,
            |ctx| {
                ApplyEngine::new(&self.store, &self.paths, &self.config, self.restart.as_ref(), ctx)
                    .apply()
            },
            |r| format!("applied {} (was {})", r.to_version, r.from_version),
        )
    }
}
