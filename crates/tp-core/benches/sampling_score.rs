//! Criterion benchmarks for the sampling hot path.
//!
//! Benchmarks `key_score` over typical operation id lengths and the
//! fixed-rate sampler, buffer and quota on the producer's side of `track`.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tp_common::{SystemClock, TelemetryItem};
use tp_config::BufferSettings;
use tp_core::buffer::{BatchSink, TelemetryBuffer};
use tp_core::diagnostics::NullSink;
use tp_core::processor::CollectingProcessor;
use tp_core::quota::QuotaTracker;
use tp_core::sampling::{key_score, FixedRateSampler, KindFilter};
use tp_core::TelemetryProcessor;

// ── Helpers ──────────────────────────────────────────────────────────

struct DiscardSink;

impl BatchSink for DiscardSink {
    fn flush_batch(&self, batch: Vec<TelemetryItem>) {
        black_box(batch);
    }
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_key_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_score");
    for len in [4usize, 16, 32, 64] {
        let key: String = "0123456789abcdef".chars().cycle().take(len).collect();
        group.bench_with_input(BenchmarkId::from_parameter(len), &key, |b, key| {
            b.iter(|| key_score(black_box(key)))
        });
    }
    group.finish();
}

fn bench_fixed_sampler(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed_sampler");
    for percentage in [100.0f64, 50.0, 1.0] {
        let sampler = FixedRateSampler::with_next(
            percentage,
            KindFilter::default(),
            Arc::new(CollectingProcessor::new()) as Arc<dyn TelemetryProcessor>,
        )
        .expect("valid percentage");
        let item = TelemetryItem::event("checkout").with_operation_id("4bf92f3577b34da6");
        group.bench_with_input(
            BenchmarkId::from_parameter(percentage),
            &item,
            |b, item| b.iter(|| sampler.process(black_box(item.clone()))),
        );
    }
    group.finish();
}

fn bench_buffer_process(c: &mut Criterion) {
    let buffer = TelemetryBuffer::new(
        &BufferSettings::default(),
        Arc::new(DiscardSink),
        Arc::new(NullSink),
    )
    .expect("default settings are valid");
    let item = TelemetryItem::trace("cache miss", None);
    c.bench_function("buffer_process", |b| {
        b.iter(|| buffer.process(black_box(item.clone())))
    });
}

fn bench_quota(c: &mut Criterion) {
    let quota = QuotaTracker::with_rate(1e12, None, 1e9, Arc::new(SystemClock::new()))
        .expect("valid quota");
    c.bench_function("quota_apply", |b| b.iter(|| black_box(quota.apply_quota())));
}

criterion_group!(
    benches,
    bench_key_score,
    bench_fixed_sampler,
    bench_buffer_process,
    bench_quota
);
criterion_main!(benches);
