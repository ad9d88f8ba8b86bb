//! Fuzz target for persisted transmission records.
//!
//! Tests that `decode_record` rejects arbitrary bytes without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tp_storage::decode_record;

fuzz_target!(|data: &[u8]| {
    let _ = decode_record(data);
});
