//! Sliding-expiration cache for per-operation correlation state.
//!
//! Entries live for `ttl` after their last insert or `get`. Expired entries
//! are invisible immediately and removed by [`CorrelationCache::sweep`],
//! which an optional background sweeper calls periodically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tracing::debug;

use tp_common::Clock;

use crate::periodic::PeriodicTask;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Duration,
}

pub struct CorrelationCache<V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry<V>>>,
    evicted: AtomicU64,
    sweeper: Mutex<Option<PeriodicTask>>,
}

impl<V> CorrelationCache<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
            evicted: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deadline(&self, now: Duration) -> Duration {
        now.saturating_add(self.ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or replace an entry, returning the previous live value.
    pub fn insert(&self, key: impl Into<String>, value: V) -> Option<V> {
        let now = self.clock.elapsed();
        let entry = Entry {
            value,
            expires_at: self.deadline(now),
        };
        self.lock()
            .insert(key.into(), entry)
            .filter(|old| old.expires_at > now)
            .map(|old| old.value)
    }

    /// Remove an entry. Expired entries are removed but not returned.
    pub fn remove(&self, key: &str) -> Option<V> {
        let now = self.clock.elapsed();
        self.lock()
            .remove(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.elapsed();
        self.lock()
            .get(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Remove every entry expired at `now`; returns how many were removed.
    pub fn sweep_at(&self, now: Duration) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            self.evicted.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, remaining = entries.len(), "evicted expired correlation entries");
        }
        removed
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(self.clock.elapsed())
    }

    /// Entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries removed by sweeps so far.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn stop_sweeper(&self) {
        let task = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut task) = task {
            task.stop();
        }
    }
}

impl<V: Clone> CorrelationCache<V> {
    /// Look up a live entry and extend its expiry.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.elapsed();
        let deadline = self.deadline(now);
        let mut entries = self.lock();
        let entry = entries.get_mut(key).filter(|entry| entry.expires_at > now)?;
        entry.expires_at = deadline;
        Some(entry.value.clone())
    }
}

impl<V: Send + 'static> CorrelationCache<V> {
    /// Sweep every `interval` on a background thread until dropped.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> std::io::Result<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn("tp-correlation-sweep", interval, move || {
            if let Some(cache) = weak.upgrade() {
                cache.sweep();
            }
        })?;
        *self.sweeper.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        Ok(())
    }
}

impl<V> Drop for CorrelationCache<V> {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tp_common::ManualClock;

    fn cache(ttl_secs: u64) -> (CorrelationCache<u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (
            CorrelationCache::new(Duration::from_secs(ttl_secs), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_insert_get_remove() {
        let (c, _) = cache(60);
        assert!(c.insert("op-1", 7).is_none());
        assert_eq!(c.get("op-1"), Some(7));
        assert_eq!(c.insert("op-1", 8), Some(7));
        assert_eq!(c.remove("op-1"), Some(8));
        assert!(c.is_empty());
    }

    #[test]
    fn test_entries_expire() {
        let (c, clock) = cache(60);
        c.insert("op-1", 1);
        clock.advance(Duration::from_secs(60));
        assert_eq!(c.get("op-1"), None);
        assert!(!c.contains("op-1"));
        assert_eq!(c.remove("op-1"), None);
    }

    #[test]
    fn test_get_slides_expiry() {
        let (c, clock) = cache(60);
        c.insert("op-1", 1);
        for _ in 0..5 {
            clock.advance(Duration::from_secs(45));
            assert_eq!(c.get("op-1"), Some(1));
        }
        clock.advance(Duration::from_secs(61));
        assert_eq!(c.get("op-1"), None);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (c, clock) = cache(60);
        c.insert("old", 1);
        clock.advance(Duration::from_secs(30));
        c.insert("new", 2);
        clock.advance(Duration::from_secs(31));

        assert_eq!(c.len(), 2);
        assert_eq!(c.sweep(), 1);
        assert_eq!(c.len(), 1);
        assert!(c.contains("new"));
        assert_eq!(c.evicted(), 1);
    }

    #[test]
    fn test_background_sweeper() {
        let clock = Arc::new(ManualClock::new());
        let c = Arc::new(CorrelationCache::new(Duration::from_secs(1), clock.clone()));
        c.insert("op", 1u32);
        clock.advance(Duration::from_secs(5));
        c.start_sweeper(Duration::from_millis(5)).unwrap();

        let started = std::time::Instant::now();
        while c.len() > 0 && started.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(c.len(), 0);
        c.stop_sweeper();
    }
}
