//! ApplyEngine: snapshot, delete, copy, persist, restart.
//!
//! Each live file is replaced through a temporary sibling and a rename, so
//! it is either old or new. The tree as a whole is not atomic: the
//! `applying` phase is made durable before the first live mutation, and a
//! startup that finds it restores the snapshot.

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

use uplift_common::{Error, RelPath, Result, Version};
use uplift_config::UpdateConfig;

use crate::backup::BackupVault;
use crate::fsutil;
use crate::layout::UpdatePaths;
use crate::logging::{event_names, LogContext, Stage};
use crate::restart::{request_restart, RestartOutcome, RestartTrigger};
use crate::state::{Phase, StateStore};

/// File operations an apply performs on the live tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyPlan {
    /// Every staged file, copied over the live tree.
    pub copies: Vec<RelPath>,
    /// Live files under updateable directories that the release dropped.
    pub deletions: Vec<RelPath>,
    /// Staged files with no live counterpart.
    pub added: Vec<RelPath>,
    /// Staged files that replace an existing live file.
    pub overwritten: Vec<RelPath>,
}

impl ApplyPlan {
    /// Compare the staged release with the live tree.
    pub fn build(staging: &Path, live: &Path, updateable_dirs: &[RelPath]) -> Result<Self> {
        let staged: BTreeSet<RelPath> = fsutil::list_files(staging)?.into_iter().collect();

        let mut deletions = Vec::new();
        for dir in updateable_dirs {
            for inner in fsutil::list_files(&dir.to_path(live))? {
                let path = RelPath::new(&format!("{}/{}", dir, inner))?;
                if !staged.contains(&path) {
                    deletions.push(path);
                }
            }
        }
        deletions.sort();
        deletions.dedup();

        let (overwritten, added): (Vec<RelPath>, Vec<RelPath>) = staged
            .iter()
            .cloned()
            .partition(|p| p.to_path(live).is_file());

        Ok(Self {
            copies: staged.into_iter().collect(),
            deletions,
            added,
            overwritten,
        })
    }

    /// Live files the snapshot must hold.
    pub fn backup_footprint(&self) -> Vec<RelPath> {
        let mut files: Vec<RelPath> = self
            .overwritten
            .iter()
            .chain(self.deletions.iter())
            .cloned()
            .collect();
        files.sort();
        files.dedup();
        files
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub from_version: Version,
    pub to_version: Version,
    pub copied: usize,
    pub deleted: usize,
    pub added: usize,
    pub restart: RestartOutcome,
}

pub struct ApplyEngine<'a> {
    store: &'a StateStore,
    paths: &'a UpdatePaths,
    config: &'a UpdateConfig,
    restart: &'a dyn RestartTrigger,
    ctx: &'a LogContext,
}

impl<'a> ApplyEngine<'a> {
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

    /// Install the staged release and request a restart.
    ///
    /// Once the first live file is touched the apply runs to completion; a
    /// failure from that point leaves the `applying` phase for the next
    /// startup evaluation to roll back.
    pub fn apply(&self) -> Result<ApplyReport> {
        let (from, target) = match self.preconditions() {
            Ok(versions) => versions,
            Err(e) => {
                if !matches!(e, Error::StateCorruption { .. }) {
                    self.store.record_error(&e);
                }
                return Err(e);
            }
        };

        crate::log_event!(
            self.ctx,
            INFO,
            event_names::APPLY_STARTED,
            Stage::Apply,
            "applying staged release",
            from = %from,
            to = %target
        );

        let staging = self.paths.staging_dir();
        let dirs = self
            .config
            .updateable_dirs
            .iter()
            .map(|d| RelPath::new(d))
            .collect::<Result<Vec<_>>>()?;
        let plan = ApplyPlan::build(&staging, &self.paths.live_dir, &dirs)?;
        if plan.copies.is_empty() {
            let e = Error::NothingStaged(format!("{} is empty", staging.display()));
            self.store.record_error(&e);
            return Err(e);
        }

        let vault = BackupVault::new(self.store, self.paths, self.ctx);
        if let Err(e) = vault.snapshot(from, &plan.backup_footprint(), &plan.added) {
            self.store.record_error(&e);
            return Err(e);
        }

        self.store.update(|s| {
            s.phase = Phase::Applying;
            Ok(())
        })?;

        if let Err(e) = self.replace_live(&plan, &dirs, &staging, target) {
            crate::log_event!(
                self.ctx,
                ERROR,
                event_names::APPLY_FAILED,
                Stage::Apply,
                "apply failed mid-way, rollback owed at next startup",
                error = %e
            );
            self.store.record_error(&e);
            return Err(e);
        }

        self.store.update(|s| {
            s.current_version = target;
            s.backup_version = Some(from);
            s.pending_verification = true;
            s.verification_starts = 0;
            s.phase = Phase::PendingVerification;
            s.last_error = None;
            Ok(())
        })?;

        crate::log_event!(
            self.ctx,
            INFO,
            event_names::APPLY_FINISHED,
            Stage::Apply,
            "release applied, verification pending",
            from = %from,
            to = %target,
            copied = plan.copies.len(),
            deleted = plan.deletions.len()
        );

        let restart = request_restart(self.restart, self.ctx, Stage::Apply);
        Ok(ApplyReport {
            from_version: from,
            to_version: target,
            copied: plan.copies.len(),
            deleted: plan.deletions.len(),
            added: plan.added.len(),
            restart,
        })
    }

    fn preconditions(&self) -> Result<(Version, Version)> {
        let state = self.store.load()?;
        state.ensure_enabled(self.config.enabled)?;
        if state.pending_verification {
            return Err(Error::OperationInProgress {
                operation: "verification of the last update is pending".to_string(),
            });
        }
        let staged = match (state.phase, state.staged_version) {
            (Phase::Staged, Some(v)) => v,
            _ => {
                return Err(Error::NothingStaged(format!(
                    "no validated release is staged (phase {})",
                    state.phase
                )))
            }
        };
        if !self.paths.staging_dir().is_dir() {
            return Err(Error::NothingStaged(format!(
                "{} is missing",
                self.paths.staging_dir().display()
            )));
        }
        Ok((state.current_version, staged))
    }

    fn replace_live(
        &self,
        plan: &ApplyPlan,
        dirs: &[RelPath],
        staging: &Path,
        target: Version,
    ) -> Result<()> {
        let live = &self.paths.live_dir;

        for path in &plan.deletions {
            fsutil::remove_file_if_exists(&path.to_path(live))?;
            crate::log_event!(
                self.ctx,
                DEBUG,
                event_names::APPLY_FILE_DELETED,
                Stage::Apply,
                "removed file dropped by the release",
                path = %path
            );
        }
        for dir in dirs {
            fsutil::prune_empty_dirs(&dir.to_path(live))?;
        }

        for path in &plan.copies {
            fsutil::replace_file(&path.to_path(staging), &path.to_path(live))?;
        }
        fsutil::sync_dir(live)?;

        if !self.paths.version_file.starts_with(live) {
            fsutil::write_atomic(&self.paths.version_file, format!("{}\n", target).as_bytes())?;
        }
        Ok(())
    }
}
