//! Release-relative paths.
//!
//! Every path that arrives from a remote listing, a checksum manifest or a
//! release archive goes through [`RelPath::new`] before it is joined onto a
//! local directory, so nothing can escape the staging or live tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// A normalized, `/`-separated path relative to a release root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    /// Validate and normalize `raw`.
    ///
    /// Accepts `\` as a separator, drops empty and `.` components, and
    /// rejects absolute paths and any `..` component.
    pub fn new(raw: &str) -> Result<Self, Error> {
        let unified = raw.replace('\\', "/");
        if unified.starts_with('/') {
            return Err(Error::Remote(format!("absolute path in release: {raw}")));
        }

        let mut parts = Vec::new();
        for component in unified.split('/') {
            match component {
                "" | "." => continue,
                ".." => return Err(Error::Remote(format!("path escapes release root: {raw}"))),
                c if c.contains('\0') => {
                    return Err(Error::Remote(format!("NUL byte in path: {raw:?}")))
                }
                c => parts.push(c),
            }
        }

        if parts.is_empty() {
            return Err(Error::Remote(format!("empty path in release: {raw:?}")));
        }
        if parts[0].len() == 2 && parts[0].ends_with(':') {
            return Err(Error::Remote(format!("drive-qualified path in release: {raw}")));
        }

        Ok(Self(parts.join("/")))
    }

    /// Build from a path under `root`, e.g. while walking a local tree.
    pub fn from_path_under(root: &Path, path: &Path) -> Result<Self, Error> {
        let rel = path.strip_prefix(root).map_err(|_| {
            Error::Remote(format!(
                "{} is not under {}",
                path.display(),
                root.display()
            ))
        })?;
        let joined = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Self::new(&joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join onto a local base directory.
    pub fn to_path(&self, base: &Path) -> PathBuf {
        let mut out = base.to_path_buf();
        for part in self.0.split('/') {
            out.push(part);
        }
        out
    }

    /// First component, used to match against `updateable_dirs`.
    pub fn top_level(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// True when the path lies in `dir` (given release-relative, `/`-separated).
    pub fn is_within(&self, dir: &str) -> bool {
        let dir = dir.trim_matches('/');
        dir.is_empty()
            || self.0 == dir
            || (self.0.starts_with(dir) && self.0.as_bytes().get(dir.len()) == Some(&b'/'))
    }

    /// File name component.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Strip a leading directory prefix, as when a release archive wraps
    /// everything in `app/`.
    pub fn strip_dir(&self, dir: &str) -> Option<RelPath> {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            return Some(self.clone());
        }
        let rest = self.0.strip_prefix(dir)?.strip_prefix('/')?;
        RelPath::new(rest).ok()
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RelPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RelPath::new(&value)
    }
}

impl From<RelPath> for String {
    fn from(path: RelPath) -> Self {
        path.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes() {
        assert_eq!(RelPath::new("a/./b//c.txt").unwrap().as_str(), "a/b/c.txt");
        assert_eq!(RelPath::new("static\\css\\x.css").unwrap().as_str(), "static/css/x.css");
    }

    #[test]
    fn test_rejects_escapes() {
        for bad in ["/etc/passwd", "../up", "a/../../b", "", ".", "C:/x", "a/\0b"] {
            assert!(RelPath::new(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_within_and_strip() {
        let p = RelPath::new("static/js/app.js").unwrap();
        assert!(p.is_within("static"));
        assert!(p.is_within("static/js/"));
        assert!(!p.is_within("stat"));
        assert_eq!(p.top_level(), "static");
        assert_eq!(p.file_name(), "app.js");
        assert_eq!(p.strip_dir("static").unwrap().as_str(), "js/app.js");
        assert!(p.strip_dir("other").is_none());
    }

    #[test]
    fn test_to_path_and_back() {
        let root = Path::new("/srv/app");
        let p = RelPath::new("a/b.txt").unwrap();
        let full = p.to_path(root);
        assert_eq!(full, PathBuf::from("/srv/app/a/b.txt"));
        assert_eq!(RelPath::from_path_under(root, &full).unwrap(), p);
    }
}
