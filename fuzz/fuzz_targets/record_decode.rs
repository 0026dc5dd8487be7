//! Fuzz test for stored record decoding
//!
//! Corrupt values must surface as errors, never panics.
//!
//! Run with: cargo +nightly fuzz run record_decode -- -max_total_time=60

#![no_main]

use hubstore_storage::{decode_message, decode_on_chain_event};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let key = [26u8, 4];
    if let Ok(event) = decode_on_chain_event(&key, data) {
        let _ = event.validate();
    }
    let _ = decode_message(&key, data);
});
