//! Fuzz target for release-relative path validation.
//!
//! Accepted paths must stay inside the tree they are joined onto.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::path::{Component, Path};
use uplift_common::RelPath;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(rel) = RelPath::new(text) {
            let joined = rel.to_path(Path::new("/base"));
            assert!(joined.starts_with("/base"));
            assert!(!joined
                .components()
                .any(|c| matches!(c, Component::ParentDir)));
        }
    }
});
