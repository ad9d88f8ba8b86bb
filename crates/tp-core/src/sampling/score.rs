//! Deterministic sampling score.
//!
//! Items that share a correlation key get the same score, so a whole
//! operation is either kept or dropped together.

use rand::Rng;

use tp_common::TelemetryItem;

/// Minimum number of UTF-16 units hashed; shorter keys are repeated.
const MIN_HASH_INPUT: usize = 8;

/// Score in `[0, 100]` for an item: hashed from its correlation key, or
/// drawn uniformly from `[0, 100)` when it has none.
pub fn item_score(item: &TelemetryItem) -> f64 {
    match item.correlation_key() {
        Some(key) => key_score(key),
        None => random_score(),
    }
}

/// djb2 over the key's UTF-16 code units, scaled to `[0, 100]`.
pub fn key_score(key: &str) -> f64 {
    let units: Vec<u16> = key.encode_utf16().collect();
    if units.is_empty() {
        return random_score();
    }

    let mut hash: i32 = 5381;
    let mut hashed = 0;
    while hashed < MIN_HASH_INPUT {
        for &unit in &units {
            hash = hash.wrapping_mul(33).wrapping_add(unit as i32);
        }
        hashed += units.len();
    }

    let hash = if hash == i32::MIN { i32::MAX } else { hash.abs() };
    hash as f64 / i32::MAX as f64 * 100.0
}

/// Uniform draw from `[0, 100)`.
pub fn random_score() -> f64 {
    rand::rng().random_range(0.0..100.0)
}

/// Whether an item with `score` survives sampling at `percentage`.
pub fn is_sampled_in(score: f64, percentage: f64) -> bool {
    score < percentage
}
