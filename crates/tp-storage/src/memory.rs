//! In-memory transmission store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::info;

use crate::error::StorageError;
use crate::record::{StoredTransmission, Transmission};
use crate::store::{StoreLimits, StoreStats, TransmissionStore};

#[derive(Debug, Default)]
struct Inner {
    records: VecDeque<StoredTransmission>,
    bytes: u64,
    next_id: u64,
}

/// Volatile store used when no storage directory is configured, and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    limits: StoreLimits,
    inner: Mutex<Inner>,
    expired: AtomicU64,
    rejected: AtomicU64,
}

impl MemoryStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TransmissionStore for MemoryStore {
    fn store(&self, transmission: &Transmission) -> Result<String, StorageError> {
        let mut inner = self.lock();
        let incoming = transmission.len() as u64;
        if let Err(err) = self.limits.check(inner.records.len(), inner.bytes, incoming) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }

        inner.next_id += 1;
        let key = format!("{:020}", inner.next_id);
        inner.bytes += incoming;
        inner.records.push_back(StoredTransmission {
            key: key.clone(),
            transmission: transmission.clone(),
        });
        Ok(key)
    }

    fn peek(&self) -> Result<Option<StoredTransmission>, StorageError> {
        let cutoff = chrono::Duration::from_std(self.limits.max_record_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));

        let mut inner = self.lock();
        while let Some(front) = inner.records.front() {
            if cutoff.map_or(true, |cutoff| front.transmission.created_at >= cutoff) {
                return Ok(Some(front.clone()));
            }
            if let Some(old) = inner.records.pop_front() {
                inner.bytes -= old.transmission.len() as u64;
                self.expired.fetch_add(1, Ordering::Relaxed);
                info!(key = %old.key, "purged expired transmission");
            }
        }
        Ok(None)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if let Some(pos) = inner.records.iter().position(|r| r.key == key) {
            if let Some(removed) = inner.records.remove(pos) {
                inner.bytes -= removed.transmission.len() as u64;
            }
        }
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.lock().records.len())
    }

    fn size_bytes(&self) -> Result<u64, StorageError> {
        Ok(self.lock().bytes)
    }

    fn stats(&self) -> Result<StoreStats, StorageError> {
        let inner = self.lock();
        Ok(StoreStats {
            records: inner.records.len(),
            bytes: inner.bytes,
            quarantined: 0,
            expired: self.expired.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        })
    }
}
