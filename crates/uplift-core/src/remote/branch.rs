//! Files read one by one from a git branch.
//!
//! The version comes from `<raw>/<repo>/<branch>/<subdir>/VERSION`; the file
//! list from the recursive git tree listing, limited to `<subdir>/` and
//! filtered by [`FileFilter`]. An optional `CHECKSUMS.sha256` next to
//! `VERSION` declares per-file digests.

use serde::Deserialize;

use uplift_common::{ChecksumManifest, Error, RelPath, Result, Version, CHECKSUMS_FILE_NAME, VERSION_FILE_NAME};
use uplift_config::SourceConfig;

use super::http::{join_url, HttpClient};
use super::{FileFilter, ReleaseManifest, ReleasePayload, RemoteError, RemoteSource};

#[derive(Debug, Deserialize)]
struct GitTree {
    tree: Vec<GitTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct GitTreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone)]
pub struct BranchSource {
    http: HttpClient,
    api_base: String,
    raw_base: String,
    repo: String,
    branch: String,
    subdir: String,
    filter: FileFilter,
}

impl BranchSource {
    pub fn new(
        source: &SourceConfig,
        repo: &str,
        branch: &str,
        subdir: &str,
        filter: FileFilter,
    ) -> Self {
        Self {
            http: HttpClient::new(source),
            api_base: source.api_base.clone(),
            raw_base: source.raw_base.clone(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            subdir: subdir.trim_matches('/').to_string(),
            filter,
        }
    }

    fn raw_url(&self, path: &str) -> String {
        join_url(
            &self.raw_base,
            &[&self.repo, &self.branch, &self.subdir, &encode_path(path)],
        )
    }

    fn list_files(&self) -> Result<Vec<RelPath>> {
        let url = format!(
            "{}?recursive=1",
            join_url(&self.api_base, &["repos", &self.repo, "git/trees", &self.branch])
        );
        let tree: GitTree = self.http.get_json(&url)?;
        if tree.truncated {
            return Err(RemoteError::Protocol(format!("tree listing of {} is truncated", self.repo)).into());
        }

        let prefix = if self.subdir.is_empty() {
            String::new()
        } else {
            format!("{}/", self.subdir)
        };
        let mut files = Vec::new();
        for entry in tree.tree.into_iter().filter(|e| e.kind == "blob") {
            let Some(stripped) = entry.path.strip_prefix(&prefix) else {
                continue;
            };
            let Ok(path) = RelPath::new(stripped) else {
                continue;
            };
            if self.filter.includes(&path) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl RemoteSource for BranchSource {
    fn describe(&self) -> String {
        format!("branch {}@{}", self.repo, self.branch)
    }

    fn latest_version(&self) -> Result<Version> {
        let url = self.raw_url(VERSION_FILE_NAME);
        let text = self.http.get_text(&url)?.ok_or_else(|| {
            Error::Remote(format!("{} not found on {}@{}", VERSION_FILE_NAME, self.repo, self.branch))
        })?;
        Version::parse(&text)
    }

    fn open_release(&self, version: &Version) -> Result<Box<dyn ReleasePayload>> {
        let files = self.list_files()?;
        let checksums = match self.http.get_text(&self.raw_url(CHECKSUMS_FILE_NAME))? {
            Some(text) => ChecksumManifest::parse(&text)?,
            None => ChecksumManifest::default(),
        };
        let manifest = ReleaseManifest::from_listing(*version, files, &checksums)?;
        Ok(Box::new(BranchPayload {
            source: self.clone(),
            manifest,
        }))
    }
}

struct BranchPayload {
    source: BranchSource,
    manifest: ReleaseManifest,
}

impl ReleasePayload for BranchPayload {
    fn manifest(&self) -> &ReleaseManifest {
        &self.manifest
    }

    fn fetch(&mut self, path: &RelPath) -> Result<Option<Vec<u8>>> {
        Ok(self.source.http.get_bytes(&self.source.raw_url(path.as_str()))?)
    }
}

/// Percent-encode the characters that would change a raw URL's meaning.
fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '%' => out.push_str("%25"),
            _ => out.push(c),
        }
    }
    out
}
