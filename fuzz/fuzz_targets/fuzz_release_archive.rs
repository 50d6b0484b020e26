//! Fuzz target for release archive extraction.
//!
//! Archives come from untrusted release assets. Extraction should never
//! panic, and every extracted entry must be a safe relative path.

#![no_main]

use libfuzzer_sys::fuzz_target;
use uplift_core::remote::release::extract_archive;

fuzz_target!(|data: &[u8]| {
    // Most random data fails at the zip central directory.
    if let Ok(files) = extract_archive(data, "app") {
        for path in files.keys() {
            assert!(!path.as_str().starts_with('/'));
            assert!(!path.as_str().split('/').any(|c| c == ".."));
        }
    }
});
