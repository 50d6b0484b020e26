//! BackupVault: the single-generation snapshot taken before every apply.
//!
//! ```text
//! backup/
//!   snapshot.json   SnapshotMeta (version, per-file SHA-256, added paths)
//!   files/          copies of the live files the apply touches
//! ```
//!
//! A new snapshot is written to `backup.partial` and swapped in, so the
//! previous generation survives until the new one is complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use uplift_common::{sha256_file, Error, RelPath, Result, Version};

use crate::fsutil;
use crate::layout::UpdatePaths;
use crate::logging::{event_names, LogContext, Stage};
use crate::state::StateStore;

const META_FILE: &str = "snapshot.json";
const FILES_DIR: &str = "files";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub path: RelPath,
    pub sha256: String,
    pub size: u64,
}

/// Description of the stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub files: Vec<SnapshotFile>,
    /// Paths the apply creates; rollback deletes them.
    #[serde(default)]
    pub added_paths: Vec<RelPath>,
}

pub struct BackupVault<'a> {
    store: &'a StateStore,
    paths: &'a UpdatePaths,
    ctx: &'a LogContext,
}

impl<'a> BackupVault<'a> {
    pub fn new(store: &'a StateStore, paths: &'a UpdatePaths, ctx: &'a LogContext) -> Self {
        Self { store, paths, ctx }
    }

    fn files_dir(&self) -> PathBuf {
        self.paths.backup_dir().join(FILES_DIR)
    }

    /// Snapshot `files` of the live tree as `version`, replacing the previous
    /// generation, and record `backup_version`.
    ///
    /// Listed files that do not exist live are skipped.
    pub fn snapshot(
        &self,
        version: Version,
        files: &[RelPath],
        added_paths: &[RelPath],
    ) -> Result<SnapshotMeta> {
        crate::log_event!(
            self.ctx,
            INFO,
            event_names::BACKUP_STARTED,
            Stage::Backup,
            "snapshotting live tree",
            version = %version,
            files = files.len()
        );

        let partial = self.paths.backup_partial_dir();
        fsutil::remove_dir_if_exists(&partial)?;
        let partial_files = partial.join(FILES_DIR);
        std::fs::create_dir_all(&partial_files).map_err(|e| Error::disk(&partial_files, e))?;

        let mut entries = Vec::with_capacity(files.len());
        for path in files {
            let live = path.to_path(&self.paths.live_dir);
            if !live.is_file() {
                continue;
            }
            let dest = path.to_path(&partial_files);
            let size = fsutil::copy_file(&live, &dest)?;
            entries.push(SnapshotFile {
                path: path.clone(),
                sha256: sha256_file(&dest)?,
                size,
            });
        }

        let meta = SnapshotMeta {
            version,
            created_at: Utc::now(),
            files: entries,
            added_paths: added_paths.to_vec(),
        };
        fsutil::write_new(&partial.join(META_FILE), &serde_json::to_vec_pretty(&meta)?)?;
        fsutil::sync_dir(&partial)?;

        let current = self.paths.backup_dir();
        let retired = self.paths.backup_retired_dir();
        fsutil::remove_dir_if_exists(&retired)?;
        if current.exists() {
            fsutil::rename_durable(&current, &retired)?;
        }
        fsutil::rename_durable(&partial, &current)?;
        fsutil::remove_dir_if_exists(&retired)?;

        self.store.update(|s| {
            s.backup_version = Some(version);
            Ok(())
        })?;

        crate::log_event!(
            self.ctx,
            INFO,
            event_names::BACKUP_SNAPSHOT_TAKEN,
            Stage::Backup,
            "snapshot taken",
            version = %version,
            files = meta.files.len(),
            added = meta.added_paths.len()
        );
        Ok(meta)
    }

    /// Whether a snapshot is on disk.
    pub fn exists(&self) -> bool {
        self.paths.backup_dir().join(META_FILE).is_file()
    }

    /// Read the snapshot description.
    pub fn load(&self) -> Result<SnapshotMeta> {
        let path = self.paths.backup_dir().join(META_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NoBackup(format!("{} does not exist", path.display())));
            }
            Err(e) => return Err(Error::disk(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::RestoreFailed(format!("snapshot metadata unreadable: {}", e)))
    }

    /// Check every stored file against its recorded digest.
    pub fn verify(&self, meta: &SnapshotMeta) -> Result<()> {
        let files_dir = self.files_dir();
        for entry in &meta.files {
            let stored = entry.path.to_path(&files_dir);
            let actual = sha256_file(&stored)
                .map_err(|e| Error::RestoreFailed(format!("{}: {}", entry.path, e)))?;
            if actual != entry.sha256 {
                return Err(Error::RestoreFailed(format!(
                    "backup copy of {} is corrupt (expected {}, got {})",
                    entry.path, entry.sha256, actual
                )));
            }
        }
        Ok(())
    }

    /// Put the snapshot back over the live tree.
    ///
    /// The snapshot is verified before the first live file is touched. Files
    /// the apply added are removed, then every stored file is replaced
    /// atomically. Any failure is `RestoreFailed`.
    pub fn restore(&self) -> Result<SnapshotMeta> {
        let meta = self.load().map_err(|e| match e {
            Error::NoBackup(msg) => Error::RestoreFailed(msg),
            other => other,
        })?;
        self.verify(&meta)?;

        let live_dir = &self.paths.live_dir;
        let restored: BTreeSet<&RelPath> = meta.files.iter().map(|f| &f.path).collect();
        let mut touched_dirs = BTreeSet::new();
        for added in &meta.added_paths {
            if restored.contains(added) {
                continue;
            }
            fsutil::remove_file_if_exists(&added.to_path(live_dir))
                .map_err(|e| Error::RestoreFailed(format!("removing {}: {}", added, e)))?;
            touched_dirs.insert(added.top_level().to_string());
        }

        let files_dir = self.files_dir();
        for entry in &meta.files {
            fsutil::replace_file(&entry.path.to_path(&files_dir), &entry.path.to_path(live_dir))
                .map_err(|e| Error::RestoreFailed(format!("restoring {}: {}", entry.path, e)))?;
        }

        for dir in touched_dirs {
            let _ = fsutil::prune_empty_dirs(&live_dir.join(dir));
        }
        fsutil::remove_stale_temps(live_dir, &self.paths.state_dir)
            .map_err(|e| Error::RestoreFailed(format!("removing temporaries: {}", e)))?;
        let _ = fsutil::sync_dir(live_dir);
        Ok(meta)
    }
}
