//! Lock-free token bucket for the live-metrics document stream.
//!
//! Balances are kept as integers scaled by [`QUOTA_SCALE`] so sub-unit
//! accrual works with integer atomics only. Accrual happens at most once per
//! elapsed whole second, decided by a CAS on the last accrued second.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tp_common::{Clock, Error, Result};
use tp_config::QuotaSettings;

/// Fixed-point scale for quota values.
pub const QUOTA_SCALE: i64 = 1000;

/// Seconds over which `max_quota` accrues by default.
const DEFAULT_WINDOW_SECS: f64 = 60.0;

#[derive(Debug)]
pub struct QuotaTracker {
    clock: Arc<dyn Clock>,
    started: Duration,
    max_quota: i64,
    rate_per_second: f64,
    current_quota: AtomicI64,
    last_accrual_second: AtomicU64,
    exhausted: AtomicBool,
}

impl QuotaTracker {
    /// Tracker accruing `max_quota / 60` per second.
    pub fn new(settings: &QuotaSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_rate(
            settings.max_quota,
            settings.start_quota,
            settings.max_quota / DEFAULT_WINDOW_SECS,
            clock,
        )
    }

    /// Tracker with an explicit accrual rate. `start_quota` defaults to
    /// `max_quota`.
    pub fn with_rate(
        max_quota: f64,
        start_quota: Option<f64>,
        rate_per_second: f64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if !(max_quota > 0.0) {
            return Err(Error::OutOfRange {
                field: "max_quota",
                value: max_quota.to_string(),
                message: "must be positive".to_string(),
            });
        }
        let start = start_quota.unwrap_or(max_quota);
        if !(0.0..=max_quota).contains(&start) {
            return Err(Error::OutOfRange {
                field: "start_quota",
                value: start.to_string(),
                message: format!("must be in [0, {}]", max_quota),
            });
        }
        if !(rate_per_second >= 0.0) {
            return Err(Error::OutOfRange {
                field: "quota_rate",
                value: rate_per_second.to_string(),
                message: "must not be negative".to_string(),
            });
        }

        let started = clock.elapsed();
        Ok(Self {
            clock,
            started,
            max_quota: scaled(max_quota),
            rate_per_second,
            current_quota: AtomicI64::new(scaled(start)),
            last_accrual_second: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
        })
    }

    /// Accrue for the elapsed time and try to spend one unit.
    pub fn apply_quota(&self) -> bool {
        let seconds = self.clock.elapsed().saturating_sub(self.started).as_secs();
        self.accrue_quota(seconds);
        let ok = self.use_quota();
        self.exhausted.store(!ok, Ordering::Relaxed);
        ok
    }

    /// Credit the quota for whole seconds up to `current_second`.
    pub fn accrue_quota(&self, current_second: u64) {
        let mut last = self.last_accrual_second.load(Ordering::Acquire);
        loop {
            // Someone already accounted for this second or a later one.
            if current_second <= last {
                return;
            }
            match self.last_accrual_second.compare_exchange(
                last,
                current_second,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let elapsed = (current_second - last) as f64;
                    let credit = (self.rate_per_second * elapsed * QUOTA_SCALE as f64) as i64;
                    self.credit(credit);
                    return;
                }
                Err(observed) => last = observed,
            }
        }
    }

    fn credit(&self, amount: i64) {
        let max = self.max_quota;
        let _ = self
            .current_quota
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| {
                Some(q.saturating_add(amount).min(max))
            });
    }

    /// Spend one unit if at least one is available.
    pub fn use_quota(&self) -> bool {
        self.current_quota
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| {
                (q >= QUOTA_SCALE).then(|| q - QUOTA_SCALE)
            })
            .is_ok()
    }

    /// Whether the last `apply_quota` call found the bucket empty.
    pub fn quota_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Current balance in units.
    pub fn current_quota(&self) -> f64 {
        self.current_quota.load(Ordering::Acquire) as f64 / QUOTA_SCALE as f64
    }

    pub fn max_quota(&self) -> f64 {
        self.max_quota as f64 / QUOTA_SCALE as f64
    }

    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_second
    }
}

fn scaled(value: f64) -> i64 {
    (value * QUOTA_SCALE as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tp_common::ManualClock;

    fn tracker(max: f64, start: Option<f64>) -> (QuotaTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let settings = QuotaSettings {
            max_quota: max,
            start_quota: start,
        };
        (QuotaTracker::new(&settings, clock.clone()).unwrap(), clock)
    }

    #[test]
    fn test_start_quota_defaults_to_max() {
        let (t, _) = tracker(30.0, None);
        assert_eq!(t.current_quota(), 30.0);
        assert!((t.rate_per_second() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_burst_then_exhausted() {
        let (t, _) = tracker(30.0, None);
        for _ in 0..30 {
            assert!(t.apply_quota());
        }
        assert!(!t.apply_quota());
        assert!(t.quota_exhausted());
        assert_eq!(t.current_quota(), 0.0);
    }

    #[test]
    fn test_accrues_per_whole_second() {
        let (t, clock) = tracker(30.0, Some(0.0));
        assert!(!t.apply_quota());

        clock.advance(Duration::from_millis(1900));
        // One whole second at 0.5/s is not enough for a unit.
        assert!(!t.apply_quota());

        clock.advance(Duration::from_millis(200));
        // Two seconds accrued in total.
        assert!(t.apply_quota());
        assert!(!t.quota_exhausted());
        assert_eq!(t.current_quota(), 0.0);
    }

    #[test]
    fn test_accrual_capped_at_max() {
        let (t, clock) = tracker(10.0, Some(5.0));
        clock.advance(Duration::from_secs(3600));
        t.accrue_quota(3600);
        assert_eq!(t.current_quota(), 10.0);
    }

    #[test]
    fn test_stale_second_is_ignored() {
        let (t, _) = tracker(60.0, Some(0.0));
        t.accrue_quota(10);
        let after_ten = t.current_quota();
        t.accrue_quota(5);
        t.accrue_quota(10);
        assert_eq!(t.current_quota(), after_ten);
        assert_eq!(after_ten, 10.0);
    }

    #[test]
    fn test_invalid_settings() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        assert!(QuotaTracker::with_rate(0.0, None, 1.0, clock.clone()).is_err());
        assert!(QuotaTracker::with_rate(10.0, Some(11.0), 1.0, clock.clone()).is_err());
        assert!(QuotaTracker::with_rate(10.0, Some(-1.0), 1.0, clock.clone()).is_err());
        assert!(QuotaTracker::with_rate(10.0, None, -1.0, clock).is_err());
    }
}
