//! SHA-256 helpers and the `sha256sum`-style checksum manifest.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// Default manifest file name at the release root.
pub const CHECKSUMS_FILE_NAME: &str = "CHECKSUMS.sha256";

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex-encoded SHA-256 of a file, read in fixed-size chunks.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::disk(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| Error::disk(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Declared checksums of a release, keyed by release-relative path.
///
/// The text format is the one `sha256sum` writes:
/// ```text
/// 3a7bd3e2360a3d29eea436fcfb7e44c735d117c42d1c1835420b6b9942dd4f1b  VERSION
/// 0b6b3a...                                                         *lib/app.so
/// ```
/// Blank lines and lines starting with `#` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    entries: BTreeMap<String, String>,
}

impl ChecksumManifest {
    /// Parse manifest text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            let malformed = |why: &str| {
                Error::Remote(format!("checksum manifest line {}: {}", idx + 1, why))
            };

            let (digest, rest) = line
                .trim_start()
                .split_once(char::is_whitespace)
                .ok_or_else(|| malformed("expected '<sha256>  <path>'"))?;

            if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(malformed("digest is not 64 hex characters"));
            }

            let rest = rest.trim_start();
            let path = rest.strip_prefix('*').unwrap_or(rest);
            let path = path.strip_prefix("./").unwrap_or(path).trim_end();
            if path.is_empty() {
                return Err(malformed("missing path"));
            }

            entries.insert(path.to_string(), digest.to_ascii_lowercase());
        }

        Ok(Self { entries })
    }

    /// Declared digest for `path`, if any.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, d)| (p.as_str(), d.as_str()))
    }

    /// Record a digest.
    pub fn insert(&mut self, path: impl Into<String>, digest: impl Into<String>) {
        self.entries
            .insert(path.into(), digest.into().to_ascii_lowercase());
    }

    /// Check `data` against the declared digest for `path`.
    ///
    /// Paths without a declared digest pass.
    pub fn verify(&self, path: &str, data: &[u8]) -> Result<()> {
        let Some(expected) = self.get(path) else {
            return Ok(());
        };
        let actual = sha256_hex(data);
        if actual != expected {
            return Err(Error::ChecksumMismatch {
                path: path.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// Render back to `sha256sum` text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (path, digest) in &self.entries {
            out.push_str(digest);
            out.push_str("  ");
            out.push_str(path);
            out.push('\n');
        }
        out
    }
}
