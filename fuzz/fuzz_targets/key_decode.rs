//! Fuzz test for store key parsing
//!
//! Arbitrary bytes fed to the key parsers must never panic, and every key
//! that parses must rebuild to the same bytes.
//!
//! Run with: cargo +nightly fuzz run key_decode -- -max_total_time=60

#![no_main]

use hubstore_core::TsHash;
use hubstore_storage::{
    make_message_primary_key, make_on_chain_event_fid_prefix, parse_on_chain_event_key,
    parse_user_key,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(Some(key)) = parse_user_key(data) {
        let rebuilt = make_message_primary_key(key.fid, key.postfix, &key.ts_hash);
        assert_eq!(rebuilt.as_slice(), data, "message key must rebuild to its bytes");
    }

    if let Ok(key) = parse_on_chain_event_key(data) {
        let prefix = make_on_chain_event_fid_prefix(key.event_type, key.fid);
        assert!(data.starts_with(&prefix), "on-chain key must sit under its fid prefix");
    }

    if let Ok(ts_hash) = TsHash::decode(data) {
        assert_eq!(ts_hash.encode().as_slice(), data);
    }
});
