//! Fixed-rate sampling processor.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use tp_common::{parse_kind_list, Error, Result, TelemetryItem, TelemetryKind};
use tp_config::SamplingSettings;

use super::score::{is_sampled_in, item_score};
use crate::processor::TelemetryProcessor;

/// Percentages at or above this are treated as "keep everything".
const FULL_SAMPLING: f64 = 100.0 - 1.0e-12;

/// Which kinds are subject to sampling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindFilter {
    pub excluded: BTreeSet<TelemetryKind>,
    /// Empty means every kind that supports sampling.
    pub included: BTreeSet<TelemetryKind>,
}

impl KindFilter {
    /// Parse semicolon-separated kind lists.
    pub fn parse(excluded: &str, included: &str) -> Result<Self> {
        Ok(Self {
            excluded: parse_kind_list(excluded)?,
            included: parse_kind_list(included)?,
        })
    }

    /// Whether items of `kind` go through the sampling decision.
    pub fn applies_to(&self, kind: TelemetryKind) -> bool {
        if !kind.supports_sampling() || self.excluded.contains(&kind) {
            return false;
        }
        self.included.is_empty() || self.included.contains(&kind)
    }
}

/// Keeps a deterministic `percentage` of sampling-eligible items.
///
/// Items not subject to sampling go to `unsampled_next`; kept items go to
/// `sampled_next`. Both may be the same processor.
pub struct FixedRateSampler {
    percentage_bits: AtomicU64,
    filter: KindFilter,
    sampled_next: Arc<dyn TelemetryProcessor>,
    unsampled_next: Arc<dyn TelemetryProcessor>,
    sampled_out: AtomicU64,
}

impl FixedRateSampler {
    pub fn new(
        percentage: f64,
        filter: KindFilter,
        sampled_next: Arc<dyn TelemetryProcessor>,
        unsampled_next: Arc<dyn TelemetryProcessor>,
    ) -> Result<Self> {
        validate_percentage(percentage)?;
        Ok(Self {
            percentage_bits: AtomicU64::new(percentage.to_bits()),
            filter,
            sampled_next,
            unsampled_next,
            sampled_out: AtomicU64::new(0),
        })
    }

    /// Sampler whose kept and unsampled items go to the same processor.
    pub fn with_next(
        percentage: f64,
        filter: KindFilter,
        next: Arc<dyn TelemetryProcessor>,
    ) -> Result<Self> {
        Self::new(percentage, filter, Arc::clone(&next), next)
    }

    pub fn from_settings(
        settings: &SamplingSettings,
        next: Arc<dyn TelemetryProcessor>,
    ) -> Result<Self> {
        let filter = KindFilter::parse(&settings.excluded_types, &settings.included_types)?;
        Self::with_next(settings.percentage, filter, next)
    }

    pub fn percentage(&self) -> f64 {
        f64::from_bits(self.percentage_bits.load(Ordering::Relaxed))
    }

    pub fn set_percentage(&self, percentage: f64) -> Result<()> {
        validate_percentage(percentage)?;
        self.percentage_bits
            .store(percentage.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn filter(&self) -> &KindFilter {
        &self.filter
    }

    /// Items dropped by the sampling decision.
    pub fn sampled_out(&self) -> u64 {
        self.sampled_out.load(Ordering::Relaxed)
    }

    fn same_next(&self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.sampled_next) as *const (),
            Arc::as_ptr(&self.unsampled_next) as *const (),
        )
    }
}

impl TelemetryProcessor for FixedRateSampler {
    fn process(&self, mut item: TelemetryItem) -> Result<()> {
        let percentage = self.percentage();

        if percentage >= FULL_SAMPLING && self.same_next() {
            return self.sampled_next.process(item);
        }

        if !self.filter.applies_to(item.kind()) {
            return self.unsampled_next.process(item);
        }

        if item.sampling_percentage().is_some() {
            return self.sampled_next.process(item);
        }

        item.set_sampling_percentage(percentage);
        if is_sampled_in(item_score(&item), percentage) {
            self.sampled_next.process(item)
        } else {
            self.sampled_out.fetch_add(1, Ordering::Relaxed);
            trace!(kind = %item.kind(), percentage, "item sampled out");
            Ok(())
        }
    }
}

pub(crate) fn validate_percentage(percentage: f64) -> Result<()> {
    if !(percentage > 0.0 && percentage <= 100.0) {
        return Err(Error::OutOfRange {
            field: "sampling_percentage",
            value: percentage.to_string(),
            message: "must be in (0, 100]".to_string(),
        });
    }
    Ok(())
}
