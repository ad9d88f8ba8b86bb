//! Fuzz target for pipeline configuration parsing.
//!
//! Feeds arbitrary text to the TOML and JSON loaders and validates whatever
//! parses. Neither step may panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tp_config::{validate_config, PipelineConfig};

fuzz_target!(|data: &str| {
    for parsed in [
        PipelineConfig::parse_toml(data),
        PipelineConfig::parse_json(data),
    ] {
        if let Ok(config) = parsed {
            let _ = validate_config(&config);
        }
    }
});
