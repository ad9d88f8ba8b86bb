//! Property-based tests for sampling invariants.

use std::sync::Arc;

use proptest::prelude::*;
use tp_common::{TelemetryItem, TelemetryKind};
use tp_core::processor::CollectingProcessor;
use tp_core::sampling::{is_sampled_in, key_score, FixedRateSampler, KindFilter};
use tp_core::TelemetryProcessor;

fn percentage_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(100.0),
        Just(50.0),
        Just(0.001),
        (1u32..=100_000).prop_map(|n| n as f64 / 1000.0),
    ]
}

fn sampler(percentage: f64) -> (FixedRateSampler, Arc<CollectingProcessor>) {
    let sink = Arc::new(CollectingProcessor::new());
    let sampler = FixedRateSampler::with_next(percentage, KindFilter::default(), sink.clone())
        .expect("valid percentage");
    (sampler, sink)
}

// ============================================================================
// Score
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(5_000))]

    #[test]
    fn key_score_is_in_range(key in "\\PC{1,64}") {
        let score = key_score(&key);
        prop_assert!((0.0..=100.0).contains(&score), "score out of range: {score}");
    }

    #[test]
    fn key_score_is_deterministic(key in "[a-zA-Z0-9-]{1,40}") {
        prop_assert_eq!(key_score(&key).to_bits(), key_score(&key).to_bits());
    }

    /// An item kept at some percentage is kept at every higher percentage.
    #[test]
    fn sampling_is_monotone_in_percentage(
        key in "[a-f0-9]{32}",
        low in percentage_strategy(),
        high in percentage_strategy(),
    ) {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        let score = key_score(&key);
        if is_sampled_in(score, low) {
            prop_assert!(is_sampled_in(score, high));
        }
    }
}

// ============================================================================
// Fixed-rate sampler
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Every item of an operation shares one decision.
    #[test]
    fn operation_is_kept_or_dropped_whole(
        op_id in "[a-f0-9]{16,32}",
        percentage in percentage_strategy(),
        n in 1usize..20,
    ) {
        let (sampler, sink) = sampler(percentage);
        for i in 0..n {
            let item = if i % 2 == 0 {
                TelemetryItem::event(format!("e{i}"))
            } else {
                TelemetryItem::trace(format!("t{i}"), None)
            };
            sampler.process(item.with_operation_id(op_id.clone())).unwrap();
        }
        let kept = sink.len();
        prop_assert!(kept == 0 || kept == n, "split operation: kept {kept} of {n}");
        prop_assert_eq!(kept as u64 + sampler.sampled_out(), n as u64);
    }

    /// Kept items carry the percentage they were sampled at.
    #[test]
    fn kept_items_are_stamped(
        op_id in "[a-f0-9]{16}",
        percentage in percentage_strategy(),
    ) {
        let (sampler, sink) = sampler(percentage);
        sampler.process(TelemetryItem::event("e").with_operation_id(op_id)).unwrap();
        for item in sink.take() {
            if percentage < 100.0 {
                prop_assert_eq!(item.sampling_percentage(), Some(percentage));
            }
        }
    }

    /// Metrics bypass sampling at any percentage.
    #[test]
    fn metrics_always_pass(percentage in percentage_strategy(), n in 1usize..50) {
        let (sampler, sink) = sampler(percentage);
        for i in 0..n {
            sampler.process(TelemetryItem::metric("m", i as f64)).unwrap();
        }
        prop_assert_eq!(sink.len(), n);
        for item in sink.take() {
            prop_assert_eq!(item.kind(), TelemetryKind::Metric);
            prop_assert!(item.sampling_percentage().is_none());
        }
    }
}

#[test]
fn kept_fraction_tracks_percentage() {
    let (sampler, sink) = sampler(25.0);
    let total = 20_000;
    for _ in 0..total {
        let op_id = uuid::Uuid::new_v4().simple().to_string();
        sampler
            .process(TelemetryItem::event("e").with_operation_id(op_id))
            .unwrap();
    }
    let fraction = sink.len() as f64 / total as f64;
    assert!(
        (0.20..=0.30).contains(&fraction),
        "kept fraction {fraction} far from 0.25"
    );
}

#[test]
fn uncorrelated_items_sample_randomly() {
    let (sampler, sink) = sampler(50.0);
    let total = 10_000;
    for i in 0..total {
        sampler.process(TelemetryItem::event(format!("e{i}"))).unwrap();
    }
    let fraction = sink.len() as f64 / total as f64;
    assert!(
        (0.45..=0.55).contains(&fraction),
        "kept fraction {fraction} far from 0.5"
    );
}
