//! On-disk layout of the update bookkeeping.
//!
//! ```text
//! <state_dir>/
//!   state.json        persisted UpdateState
//!   update.lock       cross-process operation lock
//!   state.lock        state read-modify-write lock
//!   staging.partial/  download in progress
//!   staging/          validated release awaiting apply
//!   backup.partial/   snapshot being written
//!   backup/           last known-good snapshot (files/ + snapshot.json)
//! ```
//!
//! The state directory lives outside the live tree.

use std::path::{Path, PathBuf};

use uplift_common::{Error, Result};
use uplift_config::PathsConfig;

/// Resolved filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePaths {
    pub live_dir: PathBuf,
    pub state_dir: PathBuf,
    pub version_file: PathBuf,
}

impl UpdatePaths {
    pub fn new(live_dir: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        let live_dir = live_dir.into();
        let version_file = live_dir.join(uplift_common::VERSION_FILE_NAME);
        Self {
            live_dir,
            state_dir: state_dir.into(),
            version_file,
        }
    }

    pub fn from_config(paths: &PathsConfig) -> Self {
        Self {
            live_dir: paths.live_dir.clone(),
            state_dir: paths.state_dir(),
            version_file: paths.version_file(),
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    pub fn op_lock_file(&self) -> PathBuf {
        self.state_dir.join("update.lock")
    }

    pub fn state_lock_file(&self) -> PathBuf {
        self.state_dir.join("state.lock")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.state_dir.join("staging")
    }

    pub fn staging_partial_dir(&self) -> PathBuf {
        self.state_dir.join("staging.partial")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.state_dir.join("backup")
    }

    pub fn backup_partial_dir(&self) -> PathBuf {
        self.state_dir.join("backup.partial")
    }

    pub fn backup_retired_dir(&self) -> PathBuf {
        self.state_dir.join("backup.old")
    }

    pub fn ensure_state_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).map_err(|e| Error::disk(&self.state_dir, e))
    }

    pub fn live_dir(&self) -> &Path {
        &self.live_dir
    }
}
