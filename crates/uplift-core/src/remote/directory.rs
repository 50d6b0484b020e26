//! A local mirror directory used as the release source.
//!
//! The mirror holds exactly one release, laid out like the branch strategy's
//! sub-directory: `VERSION`, an optional `CHECKSUMS.sha256` and the files.

use std::path::{Path, PathBuf};

use uplift_common::{ChecksumManifest, Error, RelPath, Result, Version, CHECKSUMS_FILE_NAME, VERSION_FILE_NAME};

use super::{FileFilter, ReleaseManifest, ReleasePayload, RemoteSource};
use crate::fsutil;

#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    filter: FileFilter,
}

impl DirectorySource {
    pub fn new(root: PathBuf, filter: FileFilter) -> Self {
        Self { root, filter }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::disk(path, e)),
    }
}

impl RemoteSource for DirectorySource {
    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }

    fn latest_version(&self) -> Result<Version> {
        let path = self.root.join(VERSION_FILE_NAME);
        let bytes = read_optional(&path)?
            .ok_or_else(|| Error::Remote(format!("{} not found", path.display())))?;
        Version::parse(&String::from_utf8_lossy(&bytes))
    }

    fn open_release(&self, version: &Version) -> Result<Box<dyn ReleasePayload>> {
        if !self.root.is_dir() {
            return Err(Error::Remote(format!(
                "mirror {} is not a directory",
                self.root.display()
            )));
        }
        let files: Vec<RelPath> = fsutil::list_files(&self.root)?
            .into_iter()
            .filter(|p| self.filter.includes(p))
            .collect();
        let checksums = match read_optional(&self.root.join(CHECKSUMS_FILE_NAME))? {
            Some(bytes) => ChecksumManifest::parse(&String::from_utf8_lossy(&bytes))?,
            None => ChecksumManifest::default(),
        };
        let manifest = ReleaseManifest::from_listing(*version, files, &checksums)?;
        Ok(Box::new(DirectoryPayload {
            root: self.root.clone(),
            manifest,
        }))
    }
}

struct DirectoryPayload {
    root: PathBuf,
    manifest: ReleaseManifest,
}

impl ReleasePayload for DirectoryPayload {
    fn manifest(&self) -> &ReleaseManifest {
        &self.manifest
    }

    fn fetch(&mut self, path: &RelPath) -> Result<Option<Vec<u8>>> {
        read_optional(&path.to_path(&self.root))
    }
}
