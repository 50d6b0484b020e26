//! Fuzz target for state.json decoding.
//!
//! A damaged state record must surface as an error, never a panic, and a
//! record that decodes and passes the invariants must survive a re-encode.

#![no_main]

use libfuzzer_sys::fuzz_target;
use uplift_core::state::UpdateState;

fuzz_target!(|data: &[u8]| {
    if let Ok(state) = serde_json::from_slice::<UpdateState>(data) {
        if state.check_invariants().is_ok() {
            let bytes = serde_json::to_vec(&state).expect("state encodes");
            let back: UpdateState = serde_json::from_slice(&bytes).expect("state decodes");
            assert_eq!(state, back);
        }
    }
});
