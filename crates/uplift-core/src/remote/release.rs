//! Tagged releases: one zip asset plus a checksum manifest asset.
//!
//! The checksum asset may declare a digest for the zip asset itself (by
//! asset name) and for files inside it (by release-relative path). The
//! archive is verified against its own entry before it is opened.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use uplift_common::{sha256_hex, ChecksumManifest, Error, RelPath, Result, Version};
use uplift_config::SourceConfig;

use super::http::{join_url, HttpClient, MAX_BODY_BYTES};
use super::{MemoryPayload, ReleaseManifest, ReleasePayload, RemoteError, RemoteSource};

/// GitHub release document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl GitHubRelease {
    pub fn find_asset(&self, name: &str) -> Option<&GitHubAsset> {
        self.assets.iter().find(|a| a.name == name)
    }

    pub fn find_asset_by_suffix(&self, suffix: &str) -> Option<&GitHubAsset> {
        self.assets.iter().find(|a| a.name.ends_with(suffix))
    }
}

/// Naming conventions of the release assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetNames {
    pub tag_prefix: String,
    pub asset_suffix: String,
    pub checksums_asset: String,
    /// Directory inside the archive holding the application tree.
    pub subdir: String,
}

#[derive(Debug, Clone)]
pub struct ReleaseSource {
    http: HttpClient,
    api_base: String,
    repo: String,
    names: AssetNames,
}

impl ReleaseSource {
    pub fn new(source: &SourceConfig, repo: &str, names: AssetNames) -> Self {
        Self {
            http: HttpClient::new(source),
            api_base: source.api_base.clone(),
            repo: repo.to_string(),
            names,
        }
    }

    fn tag_version(&self, tag: &str) -> Result<Version> {
        let stripped = tag.strip_prefix(self.names.tag_prefix.as_str()).unwrap_or(tag);
        Version::parse(stripped)
    }

    fn download(&self, asset: &GitHubAsset) -> Result<Vec<u8>> {
        let bytes = self.http.get_bytes(&asset.browser_download_url)?;
        bytes.ok_or_else(|| {
            RemoteError::Http {
                url: asset.browser_download_url.clone(),
                status: 404,
            }
            .into()
        })
    }
}

impl RemoteSource for ReleaseSource {
    fn describe(&self) -> String {
        format!("release {}", self.repo)
    }

    fn latest_version(&self) -> Result<Version> {
        let url = join_url(&self.api_base, &["repos", &self.repo, "releases/latest"]);
        let release: GitHubRelease = self.http.get_json(&url)?;
        self.tag_version(&release.tag_name)
    }

    fn open_release(&self, version: &Version) -> Result<Box<dyn ReleasePayload>> {
        let tag = format!("{}{}", self.names.tag_prefix, version);
        let url = join_url(&self.api_base, &["repos", &self.repo, "releases/tags", &tag]);
        let release: GitHubRelease = self.http.get_json(&url)?;

        let asset = release
            .find_asset_by_suffix(&self.names.asset_suffix)
            .ok_or_else(|| {
                RemoteError::Protocol(format!(
                    "release {} has no asset ending in {:?}",
                    tag, self.names.asset_suffix
                ))
            })?;
        let checksums = match release.find_asset(&self.names.checksums_asset) {
            Some(sums) => {
                let text = String::from_utf8(self.download(sums)?).map_err(|_| {
                    RemoteError::Protocol(format!("{} is not UTF-8", sums.name))
                })?;
                ChecksumManifest::parse(&text)?
            }
            None => ChecksumManifest::default(),
        };

        let archive = self.download(asset)?;
        if let Some(expected) = checksums.get(&asset.name) {
            let actual = sha256_hex(&archive);
            if actual != expected {
                return Err(Error::ChecksumMismatch {
                    path: asset.name.clone(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let files = extract_archive(&archive, &self.names.subdir)?;
        let mut file_sums = ChecksumManifest::default();
        for (path, digest) in checksums.iter() {
            if path != asset.name {
                file_sums.insert(path, digest);
            }
        }
        let manifest = ReleaseManifest::from_listing(*version, files.keys().cloned(), &file_sums)?;
        Ok(Box::new(MemoryPayload::new(manifest, files)))
    }
}

/// Unpack a zip archive into memory, keeping entries under `subdir` with
/// that prefix removed. Entries that would escape the tree are rejected.
pub fn extract_archive(bytes: &[u8], subdir: &str) -> Result<BTreeMap<RelPath, Vec<u8>>> {
    extract_limited(bytes, subdir, MAX_BODY_BYTES)
}

/// `limit` caps the bytes actually inflated, whatever the headers declare.
fn extract_limited(
    bytes: &[u8],
    subdir: &str,
    limit: u64,
) -> Result<BTreeMap<RelPath, Vec<u8>>> {
    let subdir = subdir.trim_matches('/');
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(RemoteError::from)?;
    let mut files = BTreeMap::new();
    let mut total: u64 = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(RemoteError::from)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let enclosed = entry
            .enclosed_name()
            .ok_or_else(|| RemoteError::Archive(format!("unsafe entry name {:?}", name)))?;
        let rel = RelPath::new(&enclosed.to_string_lossy())?;
        let rel = if subdir.is_empty() {
            rel
        } else {
            match rel.strip_dir(subdir) {
                Some(inner) => inner,
                None => continue,
            }
        };

        let mut data = Vec::new();
        (&mut entry)
            .take(limit - total + 1)
            .read_to_end(&mut data)
            .map_err(|e| RemoteError::Archive(format!("reading {}: {}", name, e)))?;
        total += data.len() as u64;
        if total > limit {
            return Err(
                RemoteError::Archive(format!("archive expands beyond {} bytes", limit)).into(),
            );
        }
        files.insert(rel, data);
    }

    if files.is_empty() {
        return Err(RemoteError::Archive("archive contains no release files".to_string()).into());
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::{SimpleFileOptions, ZipWriter};

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, body) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_strips_subdir() {
        let bytes = build_zip(&[
            ("frame-1.3.0/app/VERSION", "1.3.0\n"),
            ("frame-1.3.0/app/static/a.css", "body{}"),
            ("frame-1.3.0/README.md", "ignored"),
        ]);
        let files = extract_archive(&bytes, "frame-1.3.0/app").unwrap();
        let names: Vec<&str> = files.keys().map(|p| p.as_str()).collect();
        assert_eq!(names, vec!["VERSION", "static/a.css"]);
    }

    #[test]
    fn test_extract_stops_at_inflated_limit() {
        let bytes = build_zip(&[("VERSION", "1.3.0\n"), ("main.py", &"x".repeat(64))]);
        let err = extract_limited(&bytes, "", 32).unwrap_err();
        assert!(err.to_string().contains("expands beyond 32 bytes"), "{err}");

        let files = extract_limited(&bytes, "", 70).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_extract_rejects_traversal() {
        let bytes = build_zip(&[("../evil.py", "x")]);
        assert!(extract_archive(&bytes, "").is_err());
    }

    #[test]
    fn test_extract_garbage_is_remote_error() {
        let err = extract_archive(b"not a zip", "").unwrap_err();
        assert_eq!(err.code(), 21);
    }

    #[test]
    fn test_tag_version_strips_prefix() {
        let cfg = uplift_config::UpdateConfig::default();
        let source = ReleaseSource::new(
            &cfg.source,
            "acme/frame",
            AssetNames {
                tag_prefix: "v".into(),
                asset_suffix: ".zip".into(),
                checksums_asset: "SHA256SUMS".into(),
                subdir: String::new(),
            },
        );
        assert_eq!(source.tag_version("v1.10.0").unwrap(), Version::new(1, 10, 0));
        assert_eq!(source.tag_version("2.0.0").unwrap(), Version::new(2, 0, 0));
    }

    #[test]
    fn test_release_document_decodes() {
        let release: GitHubRelease = serde_json::from_str(
            r#"{"tag_name":"v1.3.0","name":"x","assets":[
                {"name":"frame-1.3.0.zip","browser_download_url":"https://dl/frame.zip","size":10},
                {"name":"SHA256SUMS","browser_download_url":"https://dl/sums","size":1}]}"#,
        )
        .unwrap();
        assert_eq!(release.find_asset_by_suffix(".zip").unwrap().size, 10);
        assert!(release.find_asset("SHA256SUMS").is_some());
    }
}
