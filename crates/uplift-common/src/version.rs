//! Release version identifiers.
//!
//! Versions are `(major, minor, patch)` triples compared numerically per
//! component, so `1.9.0 < 1.10.0`. Parsing is lenient in the ways release
//! tags usually are: a leading `v`, a pre-release or build suffix after `-`
//! or `+`, and fewer than three components are accepted.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A numerically ordered release version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

/// How a remote version relates to the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionOrdering {
    /// Remote equals local.
    UpToDate,
    /// Remote is newer than local.
    UpdateAvailable,
    /// Local is newer than remote (development checkout).
    LocalAhead,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version string such as `1.2.3`, `v1.10.0` or `2.0.0-rc.1`.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let trimmed = input.trim();
        let fail = |reason: &str| Error::VersionParse {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let without_prefix = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let core = without_prefix
            .split(['-', '+'])
            .next()
            .unwrap_or_default();

        if core.is_empty() {
            return Err(fail("empty version"));
        }

        let mut parts = [0u64; 3];
        let mut count = 0;
        for component in core.split('.') {
            if count == 3 {
                return Err(fail("more than three components"));
            }
            if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
                return Err(fail("components must be non-negative integers"));
            }
            parts[count] = component
                .parse()
                .map_err(|_| fail("component out of range"))?;
            count += 1;
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }

    /// Classify `remote` relative to `self` (the local version).
    pub fn compare_remote(&self, remote: &Version) -> VersionOrdering {
        match remote.cmp(self) {
            Ordering::Greater => VersionOrdering::UpdateAvailable,
            Ordering::Less => VersionOrdering::LocalAhead,
            Ordering::Equal => VersionOrdering::UpToDate,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

impl fmt::Display for VersionOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionOrdering::UpToDate => write!(f, "up_to_date"),
            VersionOrdering::UpdateAvailable => write!(f, "update_available"),
            VersionOrdering::LocalAhead => write!(f, "local_ahead"),
        }
    }
}
