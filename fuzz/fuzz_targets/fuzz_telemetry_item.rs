//! Fuzz target for JSON-lines telemetry input.
//!
//! Arbitrary lines go through item decoding, validation and the sampling
//! score, as `tp-core send` does.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tp_common::TelemetryItem;
use tp_core::sampling::item_score;

fuzz_target!(|data: &[u8]| {
    if let Ok(item) = serde_json::from_slice::<TelemetryItem>(data) {
        if item.validate().is_ok() {
            let score = item_score(&item);
            assert!((0.0..=100.0).contains(&score));
        }
    }
});
