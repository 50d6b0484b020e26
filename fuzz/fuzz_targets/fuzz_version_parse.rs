//! Fuzz target for version string parsing.
//!
//! Parsing must never panic, and anything that parses must print back to
//! a string that parses to the same version.

#![no_main]

use libfuzzer_sys::fuzz_target;
use uplift_common::Version;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(version) = Version::parse(text) {
            let again = Version::parse(&version.to_string()).expect("display output parses");
            assert_eq!(version, again);
        }
    }
});
