//! Fuzz target for uplift.toml parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use uplift_config::{validate_config, UpdateConfig};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(config) = UpdateConfig::parse_toml(text) {
            let _ = validate_config(&config);
        }
    }
});
