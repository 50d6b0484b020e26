//! uplift common types, errors, and integrity helpers.
//!
//! This crate provides the foundational types shared by the other uplift crates:
//! - `Version`, the numerically ordered (major, minor, patch) release identifier
//! - The unified `Error` type with stable codes and categories
//! - SHA-256 helpers and the `sha256sum`-style checksum manifest
//! - `RelPath`, a validated path relative to a release root

pub mod checksum;
pub mod error;
pub mod relpath;
pub mod version;

pub use checksum::{sha256_file, sha256_hex, ChecksumManifest, CHECKSUMS_FILE_NAME};
pub use error::{DisabledReason, Error, ErrorCategory, ErrorReport, Result};
pub use relpath::RelPath;
pub use version::{Version, VersionOrdering};

/// Schema version of the persisted state record.
pub const STATE_SCHEMA_VERSION: &str = "1.0.0";

/// Name of the version file inside a release tree.
pub const VERSION_FILE_NAME: &str = "VERSION";
