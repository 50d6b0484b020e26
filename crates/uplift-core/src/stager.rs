//! DownloadStager: fetch a release into `staging.partial`, verify it, and
//! publish it as `staging` with a single rename.
//!
//! Any failure (missing required file, checksum mismatch, network error,
//! cancellation) deletes the partial tree. A previously staged release is
//! only replaced once the new one is complete.

use serde::Serialize;
use std::collections::BTreeMap;

use uplift_common::{sha256_hex, Error, RelPath, Result, Version, VERSION_FILE_NAME};
use uplift_config::UpdateConfig;

use crate::fsutil;
use crate::layout::UpdatePaths;
use crate::logging::{event_names, LogContext, Stage};
use crate::operation::{CancelToken, OperationProgress};
use crate::remote::RemoteSource;
use crate::state::{read_local_version, Phase, StateStore};

/// What a successful download staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub version: Version,
    pub files: usize,
    pub bytes: u64,
    /// Optional files the source reported missing.
    pub skipped: Vec<RelPath>,
}

pub struct DownloadStager<'a> {
    remote: &'a dyn RemoteSource,
    store: &'a StateStore,
    paths: &'a UpdatePaths,
    config: &'a UpdateConfig,
    ctx: &'a LogContext,
}

impl<'a> DownloadStager<'a> {
    pub fn new(
        remote: &'a dyn RemoteSource,
        store: &'a StateStore,
        paths: &'a UpdatePaths,
        config: &'a UpdateConfig,
        ctx: &'a LogContext,
    ) -> Self {
        Self {
            remote,
            store,
            paths,
            config,
            ctx,
        }
    }

    /// Download and stage `target`.
    pub fn download(
        &self,
        target: Version,
        cancel: &CancelToken,
        progress: &OperationProgress,
    ) -> Result<StageReport> {
        let previous = self.store.update(|s| {
            s.ensure_enabled(self.config.enabled)?;
            match s.phase {
                Phase::PendingVerification => {
                    return Err(Error::OperationInProgress {
                        operation: "verification of the last update is pending".to_string(),
                    })
                }
                Phase::Applying | Phase::RollingBack => {
                    return Err(Error::OperationInProgress {
                        operation: format!("interrupted {} awaits startup evaluation", s.phase),
                    })
                }
                _ => {}
            }
            let previous = s.staged_version;
            s.phase = Phase::Downloading;
            s.staged_version = None;
            Ok(previous)
        });
        let previous = match previous {
            Ok(previous) => previous,
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
            event_names::DOWNLOAD_STARTED,
            Stage::Download,
            "staging release",
            version = %target,
            source = %self.remote.describe()
        );

        match self.stage(target, cancel, progress) {
            Ok(report) => {
                self.store.update(|s| {
                    s.phase = Phase::Staged;
                    s.staged_version = Some(target);
                    s.last_error = None;
                    Ok(())
                })?;
                crate::log_event!(
                    self.ctx,
                    INFO,
                    event_names::DOWNLOAD_STAGED,
                    Stage::Download,
                    "release staged",
                    version = %target,
                    files = report.files,
                    bytes = report.bytes
                );
                Ok(report)
            }
            Err(e) => {
                let _ = fsutil::remove_dir_if_exists(&self.paths.staging_partial_dir());
                let still_staged = previous.filter(|_| self.paths.staging_dir().is_dir());
                let message = e.to_string();
                let _ = self.store.update(|s| {
                    s.phase = if still_staged.is_some() {
                        Phase::Staged
                    } else {
                        Phase::Idle
                    };
                    s.staged_version = still_staged;
                    s.last_error = Some(message);
                    Ok(())
                });
                crate::log_event!(
                    self.ctx,
                    WARN,
                    event_names::DOWNLOAD_ABORTED,
                    Stage::Download,
                    "download aborted, partial staging removed",
                    version = %target,
                    error = %e
                );
                Err(e)
            }
        }
    }

    fn stage(
        &self,
        target: Version,
        cancel: &CancelToken,
        progress: &OperationProgress,
    ) -> Result<StageReport> {
        let partial = self.paths.staging_partial_dir();
        fsutil::remove_dir_if_exists(&partial)?;
        std::fs::create_dir_all(&partial).map_err(|e| Error::disk(&partial, e))?;

        let mut payload = self.remote.open_release(&target)?;
        cancel.check()?;

        let required = self
            .config
            .required_files
            .iter()
            .map(|p| RelPath::new(p))
            .collect::<Result<Vec<_>>>()?;

        let mut wanted: BTreeMap<RelPath, Option<String>> = payload
            .manifest()
            .files
            .iter()
            .map(|e| (e.path.clone(), e.checksum.clone()))
            .collect();
        for path in &required {
            wanted.entry(path.clone()).or_insert(None);
        }
        if wanted.is_empty() {
            return Err(Error::Remote(format!("release {} declares no files", target)));
        }
        progress.set_total(wanted.len() as u64);

        let mut report = StageReport {
            version: target,
            files: 0,
            bytes: 0,
            skipped: Vec::new(),
        };

        for (path, checksum) in wanted {
            cancel.check()?;
            let Some(bytes) = payload.fetch(&path)? else {
                if required.contains(&path) {
                    return Err(Error::MissingRequiredFile {
                        path: path.to_string(),
                    });
                }
                crate::log_event!(
                    self.ctx,
                    WARN,
                    event_names::DOWNLOAD_FILE_SKIPPED,
                    Stage::Download,
                    "optional file missing upstream",
                    path = %path
                );
                report.skipped.push(path);
                continue;
            };

            if let Some(expected) = checksum {
                let actual = sha256_hex(&bytes);
                if actual != expected {
                    return Err(Error::ChecksumMismatch {
                        path: path.to_string(),
                        expected,
                        actual,
                    });
                }
            }

            fsutil::write_new(&path.to_path(&partial), &bytes)?;
            progress.file_done(bytes.len() as u64);
            report.files += 1;
            report.bytes += bytes.len() as u64;
            crate::log_event!(
                self.ctx,
                DEBUG,
                event_names::DOWNLOAD_FILE_VERIFIED,
                Stage::Download,
                "file staged",
                path = %path,
                bytes = bytes.len()
            );
        }

        let staged_version_file = partial.join(VERSION_FILE_NAME);
        if staged_version_file.is_file() {
            let declared = read_local_version(&staged_version_file)?;
            if declared != target {
                return Err(Error::Remote(format!(
                    "release {} carries VERSION {}",
                    target, declared
                )));
            }
        }

        cancel.check()?;
        let staging = self.paths.staging_dir();
        fsutil::remove_dir_if_exists(&staging)?;
        fsutil::rename_durable(&partial, &staging)?;
        Ok(report)
    }
}
