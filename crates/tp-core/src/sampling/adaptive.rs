//! Adaptive sampling.
//!
//! Wraps a [`FixedRateSampler`] and retunes its percentage so the
//! post-sampling item rate converges to `max_items_per_second`. An estimator
//! placed after the sampler counts surviving items; every evaluation
//! interval the observed rate is folded into an exponential moving average
//! and a new sampling rate is suggested:
//!
//! ```text
//! rate       = 100 / percentage
//! suggested  = ceil(avg * rate / max_items_per_second), clamped
//! ```
//!
//! A lower percentage is applied only once `decrease_timeout` has passed
//! since the last change, a higher one only after `increase_timeout`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use tp_common::{Clock, Error, Result, TelemetryItem};
use tp_config::AdaptiveSettings;

use super::fixed::{validate_percentage, FixedRateSampler, KindFilter};
use crate::diagnostics::{event_names, Component, DiagnosticEvent, DiagnosticSink};
use crate::periodic::PeriodicTask;
use crate::processor::TelemetryProcessor;

/// Counts items that survived sampling and forwards them.
pub struct SamplingEstimator {
    count: AtomicU64,
    next: Arc<dyn TelemetryProcessor>,
}

impl SamplingEstimator {
    pub fn new(next: Arc<dyn TelemetryProcessor>) -> Self {
        Self {
            count: AtomicU64::new(0),
            next,
        }
    }

    /// Take the count accumulated since the last call.
    pub fn take(&self) -> u64 {
        self.count.swap(0, Ordering::Relaxed)
    }
}

impl TelemetryProcessor for SamplingEstimator {
    fn process(&self, item: TelemetryItem) -> Result<()> {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.next.process(item)
    }
}

/// An applied sampling percentage change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingChange {
    pub previous: f64,
    pub current: f64,
    /// Post-sampling items per second in the interval that triggered it.
    pub observed_rate: f64,
    pub average_rate: f64,
}

#[derive(Debug)]
struct EstimatorState {
    interval_start: Duration,
    average: Option<f64>,
    last_change: Duration,
}

/// Sampling processor whose percentage follows the observed volume.
pub struct AdaptiveSamplingProcessor {
    settings: AdaptiveSettings,
    evaluation_interval: Duration,
    decrease_timeout: Duration,
    increase_timeout: Duration,
    sampler: FixedRateSampler,
    estimator: Arc<SamplingEstimator>,
    state: Mutex<EstimatorState>,
    clock: Arc<dyn Clock>,
    diagnostics: Arc<dyn DiagnosticSink>,
    evaluator: Mutex<Option<PeriodicTask>>,
}

impl AdaptiveSamplingProcessor {
    pub fn new(
        settings: &AdaptiveSettings,
        filter: KindFilter,
        next: Arc<dyn TelemetryProcessor>,
        clock: Arc<dyn Clock>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        validate_percentage(settings.min_percentage)?;
        validate_percentage(settings.max_percentage)?;
        validate_percentage(settings.initial_percentage)?;
        if settings.min_percentage > settings.initial_percentage
            || settings.initial_percentage > settings.max_percentage
        {
            return Err(Error::InconsistentConfig(format!(
                "adaptive percentages must satisfy min <= initial <= max, got {} <= {} <= {}",
                settings.min_percentage, settings.initial_percentage, settings.max_percentage
            )));
        }
        if !(settings.max_items_per_second > 0.0) {
            return Err(Error::OutOfRange {
                field: "max_items_per_second",
                value: settings.max_items_per_second.to_string(),
                message: "must be positive".to_string(),
            });
        }

        let evaluation_interval = settings.evaluation_interval()?;
        if evaluation_interval.is_zero() {
            return Err(Error::OutOfRange {
                field: "evaluation_interval",
                value: settings.evaluation_interval_secs.to_string(),
                message: "must be positive".to_string(),
            });
        }
        let decrease_timeout = settings.decrease_timeout()?;
        let increase_timeout = settings.increase_timeout()?;

        let estimator = Arc::new(SamplingEstimator::new(Arc::clone(&next)));
        let sampler = FixedRateSampler::new(
            settings.initial_percentage,
            filter,
            estimator.clone(),
            next,
        )?;
        let now = clock.elapsed();

        Ok(Self {
            settings: settings.clone(),
            evaluation_interval,
            decrease_timeout,
            increase_timeout,
            sampler,
            estimator,
            state: Mutex::new(EstimatorState {
                interval_start: now,
                average: None,
                last_change: now,
            }),
            clock,
            diagnostics,
            evaluator: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, EstimatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the background evaluation thread.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn(
            "tp-adaptive-sampling",
            self.evaluation_interval,
            move || {
                if let Some(processor) = weak.upgrade() {
                    processor.evaluate();
                }
            },
        )?;
        *self.evaluator.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        Ok(())
    }

    /// Stop the background evaluation thread.
    pub fn stop(&self) {
        let task = self
            .evaluator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut task) = task {
            task.stop();
        }
    }

    pub fn percentage(&self) -> f64 {
        self.sampler.percentage()
    }

    pub fn sampled_out(&self) -> u64 {
        self.sampler.sampled_out()
    }

    /// Close the current interval and retune if due.
    pub fn evaluate(&self) -> Option<SamplingChange> {
        let now = self.clock.elapsed();
        let mut state = self.lock();

        let elapsed = now.saturating_sub(state.interval_start).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let observed = self.estimator.take() as f64 / elapsed;
        state.interval_start = now;

        let ratio = self.settings.moving_average_ratio;
        let average = match state.average {
            Some(avg) => avg * (1.0 - ratio) + observed * ratio,
            None => observed,
        };
        state.average = Some(average);

        let current = self.sampler.percentage();
        let min_rate = 100.0 / self.settings.max_percentage;
        let max_rate = 100.0 / self.settings.min_percentage;
        let suggested_rate = (average * (100.0 / current) / self.settings.max_items_per_second)
            .ceil()
            .clamp(min_rate, max_rate);
        let suggested = 100.0 / suggested_rate;

        debug!(
            observed_rate = observed,
            average_rate = average,
            current,
            suggested,
            "adaptive sampling evaluated"
        );

        if (suggested - current).abs() < 1e-12 {
            return None;
        }

        let timeout = if suggested < current {
            self.decrease_timeout
        } else {
            self.increase_timeout
        };
        if now.saturating_sub(state.last_change) < timeout {
            return None;
        }

        if let Err(e) = self.sampler.set_percentage(suggested) {
            warn!(error = %e, suggested, "rejected suggested sampling percentage");
            return None;
        }
        state.last_change = now;
        // The average was measured under the old percentage.
        state.average = None;

        let change = SamplingChange {
            previous: current,
            current: suggested,
            observed_rate: observed,
            average_rate: average,
        };
        self.diagnostics.emit(
            DiagnosticEvent::info(
                event_names::SAMPLING_PERCENTAGE_CHANGED,
                Component::Sampling,
                format!("sampling percentage changed from {} to {}", current, suggested),
            )
            .with_detail("previous", current)
            .with_detail("current", suggested)
            .with_detail("average_rate", average),
        );
        Some(change)
    }
}

impl TelemetryProcessor for AdaptiveSamplingProcessor {
    fn process(&self, item: TelemetryItem) -> Result<()> {
        self.sampler.process(item)
    }
}

impl Drop for AdaptiveSamplingProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{EventBus, NullSink};
    use crate::processor::CollectingProcessor;
    use tp_common::ManualClock;

    fn settings() -> AdaptiveSettings {
        AdaptiveSettings::default()
    }

    fn processor(
        clock: Arc<ManualClock>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> (AdaptiveSamplingProcessor, Arc<CollectingProcessor>) {
        let sink = Arc::new(CollectingProcessor::new());
        let p = AdaptiveSamplingProcessor::new(
            &settings(),
            KindFilter::default(),
            sink.clone(),
            clock,
            diagnostics,
        )
        .unwrap();
        (p, sink)
    }

    fn feed(p: &AdaptiveSamplingProcessor, n: usize) {
        for i in 0..n {
            p.process(TelemetryItem::event("load").with_operation_id(format!("op-{i}")))
                .unwrap();
        }
    }

    #[test]
    fn test_no_change_before_decrease_timeout() {
        let clock = Arc::new(ManualClock::new());
        let (p, _) = processor(clock.clone(), Arc::new(NullSink));

        for _ in 0..7 {
            feed(&p, 1500); // 100 items/s over 15s
            clock.advance(Duration::from_secs(15));
            assert!(p.evaluate().is_none());
        }
        assert_eq!(p.percentage(), 100.0);
    }

    #[test]
    fn test_decrease_after_timeout() {
        let clock = Arc::new(ManualClock::new());
        let bus = Arc::new(EventBus::new());
        let rx = bus.subscribe();
        let (p, _) = processor(clock.clone(), bus);

        let mut change = None;
        for _ in 0..8 {
            feed(&p, 1500);
            clock.advance(Duration::from_secs(15));
            change = p.evaluate().or(change);
        }
        let change = change.expect("percentage should drop at 120s");
        assert_eq!(change.previous, 100.0);
        // ceil(100 * 1 / 5) = 20 -> 5%
        assert!((change.current - 5.0).abs() < 1e-9);
        assert!((p.percentage() - 5.0).abs() < 1e-9);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, event_names::SAMPLING_PERCENTAGE_CHANGED);
    }

    #[test]
    fn test_increase_waits_for_increase_timeout() {
        let clock = Arc::new(ManualClock::new());
        let (p, _) = processor(clock.clone(), Arc::new(NullSink));

        for _ in 0..8 {
            feed(&p, 1500);
            clock.advance(Duration::from_secs(15));
            p.evaluate();
        }
        assert!(p.percentage() < 100.0);

        // Load stops; the percentage may only rise 15 minutes after the drop.
        let mut raised_at = None;
        for step in 1..=60 {
            clock.advance(Duration::from_secs(15));
            if p.evaluate().is_some() {
                raised_at = Some(step * 15);
                break;
            }
        }
        assert_eq!(raised_at, Some(900));
        assert_eq!(p.percentage(), 100.0);
    }

    #[test]
    fn test_clamped_to_min_percentage() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingProcessor::new());
        let custom = AdaptiveSettings {
            min_percentage: 10.0,
            decrease_timeout_secs: 0.0,
            ..AdaptiveSettings::default()
        };
        let p = AdaptiveSamplingProcessor::new(
            &custom,
            KindFilter::default(),
            sink,
            clock.clone(),
            Arc::new(NullSink),
        )
        .unwrap();

        feed(&p, 15_000); // 1000 items/s
        clock.advance(Duration::from_secs(15));
        let change = p.evaluate().unwrap();
        assert_eq!(change.current, 10.0);
    }

    #[test]
    fn test_zero_elapsed_is_ignored() {
        let clock = Arc::new(ManualClock::new());
        let (p, _) = processor(clock, Arc::new(NullSink));
        feed(&p, 10);
        assert!(p.evaluate().is_none());
    }

    #[test]
    fn test_inconsistent_settings() {
        let bad = AdaptiveSettings {
            min_percentage: 50.0,
            initial_percentage: 20.0,
            ..AdaptiveSettings::default()
        };
        let err = AdaptiveSamplingProcessor::new(
            &bad,
            KindFilter::default(),
            Arc::new(CollectingProcessor::new()),
            Arc::new(ManualClock::new()),
            Arc::new(NullSink),
        )
        .err()
        .unwrap();
        assert_eq!(err.code(), 12);
    }

    #[test]
    fn test_background_evaluator_starts_and_stops() {
        let fast = AdaptiveSettings {
            evaluation_interval_secs: 0.01,
            ..AdaptiveSettings::default()
        };
        let p = Arc::new(
            AdaptiveSamplingProcessor::new(
                &fast,
                KindFilter::default(),
                Arc::new(CollectingProcessor::new()),
                Arc::new(tp_common::SystemClock::new()),
                Arc::new(NullSink),
            )
            .unwrap(),
        );
        p.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        p.stop();
        assert_eq!(p.percentage(), 100.0);
    }
}
