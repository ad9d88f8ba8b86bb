//! Sampling stage of the processing chain.
//!
//! - [`score`]: deterministic per-operation sampling score
//! - [`fixed`]: fixed-percentage sampler with kind filters
//! - [`adaptive`]: sampler that retunes its percentage to a target rate

pub mod adaptive;
pub mod fixed;
pub mod score;

use std::sync::Arc;

use tp_common::{Clock, Result, TelemetryItem};
use tp_config::{SamplingMode, SamplingSettings};

use crate::diagnostics::DiagnosticSink;
use crate::processor::TelemetryProcessor;

pub use adaptive::{AdaptiveSamplingProcessor, SamplingChange, SamplingEstimator};
pub use fixed::{FixedRateSampler, KindFilter};
pub use score::{is_sampled_in, item_score, key_score};

/// The sampling stage selected by [`SamplingSettings::mode`].
pub enum Sampler {
    Fixed(Arc<FixedRateSampler>),
    Adaptive(Arc<AdaptiveSamplingProcessor>),
    /// Sampling off: items pass straight to the next processor.
    Disabled(Arc<dyn TelemetryProcessor>),
}

impl Sampler {
    /// Build the sampling stage in front of `next`. The adaptive sampler's
    /// evaluation thread is started here.
    pub fn from_settings(
        settings: &SamplingSettings,
        next: Arc<dyn TelemetryProcessor>,
        clock: Arc<dyn Clock>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        match settings.mode {
            SamplingMode::Disabled => Ok(Sampler::Disabled(next)),
            SamplingMode::Fixed => Ok(Sampler::Fixed(Arc::new(
                FixedRateSampler::from_settings(settings, next)?,
            ))),
            SamplingMode::Adaptive => {
                let filter =
                    KindFilter::parse(&settings.excluded_types, &settings.included_types)?;
                let processor = Arc::new(AdaptiveSamplingProcessor::new(
                    &settings.adaptive,
                    filter,
                    next,
                    clock,
                    diagnostics,
                )?);
                processor.start()?;
                Ok(Sampler::Adaptive(processor))
            }
        }
    }

    pub fn mode(&self) -> SamplingMode {
        match self {
            Sampler::Fixed(_) => SamplingMode::Fixed,
            Sampler::Adaptive(_) => SamplingMode::Adaptive,
            Sampler::Disabled(_) => SamplingMode::Disabled,
        }
    }

    pub fn current_percentage(&self) -> f64 {
        match self {
            Sampler::Fixed(s) => s.percentage(),
            Sampler::Adaptive(s) => s.percentage(),
            Sampler::Disabled(_) => 100.0,
        }
    }

    pub fn sampled_out(&self) -> u64 {
        match self {
            Sampler::Fixed(s) => s.sampled_out(),
            Sampler::Adaptive(s) => s.sampled_out(),
            Sampler::Disabled(_) => 0,
        }
    }

    /// Stop background evaluation, if any.
    pub fn shutdown(&self) {
        if let Sampler::Adaptive(s) = self {
            s.stop();
        }
    }
}

impl TelemetryProcessor for Sampler {
    fn process(&self, item: TelemetryItem) -> Result<()> {
        match self {
            Sampler::Fixed(s) => s.process(item),
            Sampler::Adaptive(s) => s.process(item),
            Sampler::Disabled(next) => next.process(item),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::NullSink;
    use crate::processor::CollectingProcessor;
    use tp_common::ManualClock;

    fn build(mode: SamplingMode, percentage: f64) -> (Sampler, Arc<CollectingProcessor>) {
        let sink = Arc::new(CollectingProcessor::new());
        let settings = SamplingSettings {
            mode,
            percentage,
            ..SamplingSettings::default()
        };
        let sampler = Sampler::from_settings(
            &settings,
            sink.clone(),
            Arc::new(ManualClock::new()),
            Arc::new(NullSink),
        )
        .unwrap();
        (sampler, sink)
    }

    #[test]
    fn test_disabled_passes_everything() {
        let (s, sink) = build(SamplingMode::Disabled, 1.0);
        for i in 0..20 {
            s.process(TelemetryItem::event("e").with_operation_id(format!("op-{i}")))
                .unwrap();
        }
        assert_eq!(sink.len(), 20);
        assert_eq!(s.current_percentage(), 100.0);
        assert_eq!(s.sampled_out(), 0);
    }

    #[test]
    fn test_fixed_reports_percentage() {
        let (s, _) = build(SamplingMode::Fixed, 25.0);
        assert_eq!(s.mode(), SamplingMode::Fixed);
        assert_eq!(s.current_percentage(), 25.0);
    }

    #[test]
    fn test_adaptive_starts_at_initial_percentage() {
        let (s, sink) = build(SamplingMode::Adaptive, 100.0);
        assert_eq!(s.mode(), SamplingMode::Adaptive);
        assert_eq!(s.current_percentage(), 100.0);
        s.process(TelemetryItem::metric("m", 1.0)).unwrap();
        assert_eq!(sink.len(), 1);
        s.shutdown();
    }
}
