//! VersionResolver: compare the local version with the remote's newest.

use chrono::Utc;
use serde::Serialize;
use std::path::Path;

use uplift_common::{Result, Version, VersionOrdering};

use crate::logging::{event_names, LogContext, Stage};
use crate::remote::RemoteSource;
use crate::state::{read_local_version, StateStore};

/// Result of a completed check, carrying the remote version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "remote", rename_all = "snake_case")]
pub enum CheckOutcome {
    UpToDate(Version),
    UpdateAvailable(Version),
    LocalAhead(Version),
}

impl CheckOutcome {
    pub fn classify(local: Version, remote: Version) -> Self {
        match local.compare_remote(&remote) {
            VersionOrdering::UpdateAvailable => CheckOutcome::UpdateAvailable(remote),
            VersionOrdering::LocalAhead => CheckOutcome::LocalAhead(remote),
            VersionOrdering::UpToDate => CheckOutcome::UpToDate(remote),
        }
    }

    pub fn remote(&self) -> Version {
        match self {
            CheckOutcome::UpToDate(v)
            | CheckOutcome::UpdateAvailable(v)
            | CheckOutcome::LocalAhead(v) => *v,
        }
    }

    pub fn is_update_available(&self) -> bool {
        matches!(self, CheckOutcome::UpdateAvailable(_))
    }

    pub fn message(&self) -> String {
        match self {
            CheckOutcome::UpToDate(v) => format!("up to date ({})", v),
            CheckOutcome::UpdateAvailable(v) => format!("update available: {}", v),
            CheckOutcome::LocalAhead(v) => format!("local version is ahead of remote {}", v),
        }
    }
}

pub struct VersionResolver<'a> {
    remote: &'a dyn RemoteSource,
    store: &'a StateStore,
    version_file: &'a Path,
    enabled: bool,
    ctx: &'a LogContext,
}

impl<'a> VersionResolver<'a> {
    pub fn new(
        remote: &'a dyn RemoteSource,
        store: &'a StateStore,
        version_file: &'a Path,
        enabled: bool,
        ctx: &'a LogContext,
    ) -> Self {
        Self {
            remote,
            store,
            version_file,
            enabled,
            ctx,
        }
    }

    /// Fetch the remote version and classify it against the local one.
    ///
    /// Every completed attempt records `last_check`; a failed one also
    /// records `last_error`. `current_version` is never touched.
    pub fn check(&self) -> Result<CheckOutcome> {
        let state = self.store.load()?;
        if let Err(e) = state.ensure_enabled(self.enabled) {
            self.store.record_error(&e);
            return Err(e);
        }

        crate::log_event!(
            self.ctx,
            INFO,
            event_names::CHECK_STARTED,
            Stage::Check,
            "checking for updates",
            source = %self.remote.describe()
        );

        let attempt = read_local_version(self.version_file)
            .and_then(|local| self.remote.latest_version().map(|remote| (local, remote)));
        let now = Utc::now();

        match attempt {
            Ok((local, remote)) => {
                let outcome = CheckOutcome::classify(local, remote);
                self.store.update(|s| {
                    s.last_check = Some(now);
                    s.available_version = Some(remote);
                    s.last_error = None;
                    Ok(())
                })?;
                crate::log_event!(
                    self.ctx,
                    INFO,
                    event_names::CHECK_FINISHED,
                    Stage::Check,
                    outcome.message(),
                    local = %local,
                    remote = %remote
                );
                Ok(outcome)
            }
            Err(e) => {
                let message = e.to_string();
                let _ = self.store.update(|s| {
                    s.last_check = Some(now);
                    s.last_error = Some(message);
                    Ok(())
                });
                crate::log_event!(
                    self.ctx,
                    WARN,
                    event_names::CHECK_FAILED,
                    Stage::Check,
                    "update check failed",
                    error = %e,
                    code = e.code()
                );
                Err(e)
            }
        }
    }
}
