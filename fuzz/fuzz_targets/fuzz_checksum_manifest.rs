//! Fuzz target for CHECKSUMS.sha256 parsing.
//!
//! Manifests arrive from the remote, so parsing handles arbitrary text
//! without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use uplift_common::ChecksumManifest;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    if let Ok(manifest) = ChecksumManifest::parse(&text) {
        for (path, digest) in manifest.iter() {
            assert_eq!(digest.len(), 64);
            assert!(!path.is_empty());
        }
        let _ = manifest.to_text();
    }
});
