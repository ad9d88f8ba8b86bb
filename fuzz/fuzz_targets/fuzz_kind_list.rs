//! Fuzz target for semicolon-separated telemetry type lists.
//!
//! Parsed lists must format back to a string that parses to the same set.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tp_common::{format_kind_list, parse_kind_list};

fuzz_target!(|data: &str| {
    if let Ok(kinds) = parse_kind_list(data) {
        let formatted = format_kind_list(&kinds);
        let reparsed = parse_kind_list(&formatted).expect("formatted list must parse");
        assert_eq!(kinds, reparsed);
    }
});
