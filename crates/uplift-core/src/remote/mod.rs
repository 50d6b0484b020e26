//! Remote release sources.
//!
//! A [`RemoteSource`] answers two questions: what is the newest version, and
//! which files (with optional checksums) make up a given release. Three
//! strategies exist and are selected once from configuration:
//!
//! - [`BranchSource`]: individual files read from a git branch
//! - [`ReleaseSource`]: a tagged release with one zip asset and a checksum asset
//! - [`DirectorySource`]: a local mirror, laid out like the branch sub-directory
//!
//! [`Remote`] is the closed set of configured strategies. Components take an
//! `Arc<dyn RemoteSource>` so tests can substitute an in-memory source.

pub mod branch;
pub mod directory;
mod http;
pub mod release;

pub use branch::BranchSource;
pub use directory::DirectorySource;
pub use release::ReleaseSource;

use serde::Serialize;
use thiserror::Error;

use uplift_common::{ChecksumManifest, Error, RelPath, Result, Version, VERSION_FILE_NAME};
use uplift_config::{SourceStrategy, UpdateConfig};

/// Errors raised while talking to a release source.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("release archive: {0}")]
    Archive(String),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Http { url, status } => Error::Network {
                url,
                message: format!("HTTP status {}", status),
            },
            RemoteError::Transport { url, message } => Error::Network { url, message },
            other => Error::Remote(other.to_string()),
        }
    }
}

/// One file of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub path: RelPath,
    /// Lowercase hex SHA-256, when the release declares one.
    pub checksum: Option<String>,
}

/// The declared file set of one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseManifest {
    pub version: Version,
    pub files: Vec<ManifestEntry>,
}

impl ReleaseManifest {
    /// Combine a file listing with a checksum manifest.
    ///
    /// Every path declared in `checksums` becomes part of the release even if
    /// the listing missed it.
    pub fn from_listing(
        version: Version,
        listing: impl IntoIterator<Item = RelPath>,
        checksums: &ChecksumManifest,
    ) -> Result<Self> {
        let mut paths: Vec<RelPath> = listing.into_iter().collect();
        for (path, _) in checksums.iter() {
            paths.push(RelPath::new(path)?);
        }
        paths.sort();
        paths.dedup();

        let files = paths
            .into_iter()
            .map(|path| {
                let checksum = checksums.get(path.as_str()).map(str::to_string);
                ManifestEntry { path, checksum }
            })
            .collect();
        Ok(Self { version, files })
    }

    pub fn entry(&self, path: &RelPath) -> Option<&ManifestEntry> {
        self.files.iter().find(|e| &e.path == path)
    }
}

/// Access to the content of one opened release.
pub trait ReleasePayload: Send {
    fn manifest(&self) -> &ReleaseManifest;

    /// Fetch one file. `Ok(None)` means the source reports it absent.
    fn fetch(&mut self, path: &RelPath) -> Result<Option<Vec<u8>>>;
}

/// A source of releases.
pub trait RemoteSource: Send + Sync {
    /// Short human-readable identity, e.g. `branch owner/repo@main`.
    fn describe(&self) -> String;

    /// Newest version the source offers.
    fn latest_version(&self) -> Result<Version>;

    /// Open the release for `version`.
    fn open_release(&self, version: &Version) -> Result<Box<dyn ReleasePayload>>;
}

/// The configured strategy.
#[derive(Debug)]
pub enum Remote {
    Branch(BranchSource),
    Release(ReleaseSource),
    Directory(DirectorySource),
}

impl Remote {
    pub fn from_config(config: &UpdateConfig) -> Self {
        let filter = FileFilter::from_config(config);
        match &config.source.strategy {
            SourceStrategy::Branch {
                repo,
                branch,
                subdir,
            } => Remote::Branch(BranchSource::new(
                &config.source,
                repo,
                branch,
                subdir,
                filter,
            )),
            SourceStrategy::Release {
                repo,
                tag_prefix,
                asset_suffix,
                checksums_asset,
                subdir,
            } => Remote::Release(ReleaseSource::new(
                &config.source,
                repo,
                release::AssetNames {
                    tag_prefix: tag_prefix.clone(),
                    asset_suffix: asset_suffix.clone(),
                    checksums_asset: checksums_asset.clone(),
                    subdir: subdir.clone(),
                },
            )),
            SourceStrategy::Directory { path } => {
                Remote::Directory(DirectorySource::new(path.clone(), filter))
            }
        }
    }

    fn inner(&self) -> &dyn RemoteSource {
        match self {
            Remote::Branch(s) => s,
            Remote::Release(s) => s,
            Remote::Directory(s) => s,
        }
    }
}

impl RemoteSource for Remote {
    fn describe(&self) -> String {
        self.inner().describe()
    }

    fn latest_version(&self) -> Result<Version> {
        self.inner().latest_version()
    }

    fn open_release(&self, version: &Version) -> Result<Box<dyn ReleasePayload>> {
        self.inner().open_release(version)
    }
}

/// Which files of a listed tree belong to a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilter {
    extensions: Vec<String>,
    excluded_dirs: Vec<String>,
}

impl FileFilter {
    pub fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            excluded_dirs: Vec::new(),
        }
    }

    pub fn from_config(config: &UpdateConfig) -> Self {
        Self::new(&config.file_extensions).excluding(&config.exclude_dirs)
    }

    /// Skip everything below these release-relative directories.
    pub fn excluding(mut self, dirs: &[String]) -> Self {
        self.excluded_dirs = dirs
            .iter()
            .map(|d| d.trim_matches('/').to_string())
            .filter(|d| !d.is_empty())
            .collect();
        self
    }

    /// Accepts `VERSION` and files with a listed extension. Hidden paths,
    /// `__pycache__`, excluded directories and `.pyc` files are never
    /// included.
    pub fn includes(&self, path: &RelPath) -> bool {
        let s = path.as_str();
        if s.split('/').any(|c| c.starts_with('.') || c == "__pycache__") {
            return false;
        }
        let excluded = self.excluded_dirs.iter().any(|dir| {
            s.strip_prefix(dir.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        });
        if excluded {
            return false;
        }
        let lower = s.to_ascii_lowercase();
        if lower.ends_with(".pyc") {
            return false;
        }
        if s == VERSION_FILE_NAME {
            return true;
        }
        self.extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }
}

/// Payload whose files are already in memory.
#[derive(Debug)]
pub struct MemoryPayload {
    manifest: ReleaseManifest,
    files: std::collections::BTreeMap<RelPath, Vec<u8>>,
}

impl MemoryPayload {
    pub fn new(
        manifest: ReleaseManifest,
        files: std::collections::BTreeMap<RelPath, Vec<u8>>,
    ) -> Self {
        Self { manifest, files }
    }
}

impl ReleasePayload for MemoryPayload {
    fn manifest(&self) -> &ReleaseManifest {
        &self.manifest
    }

    fn fetch(&mut self, path: &RelPath) -> Result<Option<Vec<u8>>> {
        Ok(self.files.remove(path))
    }
}
