//! Concurrency tests for the live-metrics quota.
//!
//! Validates:
//! - Concurrent spenders never take more than the starting balance
//! - The balance stays within [0, max] under contention
//! - Concurrent accrual for the same second credits exactly once

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tp_common::{Clock, ManualClock};
use tp_core::quota::QuotaTracker;

const THREADS: usize = 8;

fn spend_concurrently(quota: &Arc<QuotaTracker>, per_thread: usize) -> u64 {
    let barrier = Arc::new(Barrier::new(THREADS));
    let successes = Arc::new(AtomicU64::new(0));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let quota = Arc::clone(quota);
            let barrier = Arc::clone(&barrier);
            let successes = Arc::clone(&successes);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..per_thread {
                    if quota.apply_quota() {
                        successes.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    successes.load(Ordering::Relaxed)
}

// ============================================================================
// Spending
// ============================================================================

#[test]
fn test_spend_never_exceeds_balance() {
    let clock = Arc::new(ManualClock::new());
    let quota = Arc::new(QuotaTracker::with_rate(30.0, None, 0.5, clock).unwrap());

    let successes = spend_concurrently(&quota, 1_000);

    assert_eq!(successes, 30);
    assert_eq!(quota.current_quota(), 0.0);
    assert!(quota.quota_exhausted());
}

#[test]
fn test_balance_stays_in_bounds_while_time_moves() {
    let clock = Arc::new(ManualClock::new());
    let quota = Arc::new(
        QuotaTracker::with_rate(30.0, Some(10.0), 0.5, clock.clone() as Arc<dyn Clock>).unwrap(),
    );

    let done = Arc::new(AtomicBool::new(false));
    let ticker = {
        let clock = Arc::clone(&clock);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for _ in 0..60 {
                clock.advance(Duration::from_secs(1));
                thread::sleep(Duration::from_millis(1));
            }
            done.store(true, Ordering::SeqCst);
        })
    };
    let observer = {
        let quota = Arc::clone(&quota);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut violations = 0;
            while !done.load(Ordering::SeqCst) {
                let q = quota.current_quota();
                if !(0.0..=30.0).contains(&q) {
                    violations += 1;
                }
            }
            violations
        })
    };

    let successes = spend_concurrently(&quota, 5_000);
    ticker.join().unwrap();
    assert_eq!(observer.join().unwrap(), 0);

    // Start balance plus at most 60s of accrual at 0.5/s.
    assert!(successes >= 10, "spent only {successes}");
    assert!(successes <= 40, "overspent: {successes}");
    let q = quota.current_quota();
    assert!((0.0..=30.0).contains(&q));
}

// ============================================================================
// Accrual
// ============================================================================

#[test]
fn test_concurrent_accrual_credits_once() {
    let clock = Arc::new(ManualClock::new());
    let quota = Arc::new(QuotaTracker::with_rate(30.0, Some(0.0), 1.0, clock).unwrap());

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let quota = Arc::clone(&quota);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                quota.accrue_quota(10);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(quota.current_quota(), 10.0);

    // Earlier seconds are already accounted for.
    quota.accrue_quota(5);
    assert_eq!(quota.current_quota(), 10.0);
}

#[test]
fn test_accrual_caps_at_max() {
    let clock = Arc::new(ManualClock::new());
    let quota = QuotaTracker::with_rate(30.0, Some(25.0), 1.0, clock.clone()).unwrap();

    clock.advance(Duration::from_secs(3_600));
    assert!(quota.apply_quota());
    assert_eq!(quota.current_quota(), 29.0);
}
