//! Queue contract shared by the file-backed and in-memory stores.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::StorageError;
use crate::record::{StoredTransmission, Transmission};

/// Durable FIFO of transmissions awaiting delivery.
///
/// Implementations must be safe for concurrent `store`, `peek` and `delete`
/// from different threads. `peek` never dequeues: a record is removed only by
/// an explicit `delete`, so a crash between send and delete redelivers it.
pub trait TransmissionStore: Send + Sync {
    /// Persist a transmission and return its storage key.
    fn store(&self, transmission: &Transmission) -> Result<String, StorageError>;

    /// Oldest stored transmission, if any.
    fn peek(&self) -> Result<Option<StoredTransmission>, StorageError>;

    /// Remove a record. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Remove a record that could not be decoded.
    fn quarantine(&self, key: &str) -> Result<(), StorageError> {
        self.delete(key)
    }

    /// Number of stored records.
    fn len(&self) -> Result<usize, StorageError>;

    /// Total stored size in bytes.
    fn size_bytes(&self) -> Result<u64, StorageError>;

    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of counters for status reporting.
    fn stats(&self) -> Result<StoreStats, StorageError> {
        Ok(StoreStats {
            records: self.len()?,
            bytes: self.size_bytes()?,
            ..StoreStats::default()
        })
    }
}

/// Capacity and age limits applied by every store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLimits {
    /// Maximum total bytes held; a store that would exceed it is rejected.
    pub max_bytes: u64,

    /// Maximum number of records held.
    pub max_records: usize,

    /// Records older than this are purged unsent.
    pub max_record_age: Duration,
}

impl Default for StoreLimits {
    fn default() -> Self {
        StoreLimits {
            max_bytes: 10 * 1024 * 1024, // 10 MiB
            max_records: 5000,
            max_record_age: Duration::from_secs(48 * 3600),
        }
    }
}

impl StoreLimits {
    /// Reject the incoming record if it would push the store over a limit.
    pub fn check(&self, records: usize, bytes: u64, incoming: u64) -> Result<(), StorageError> {
        if records >= self.max_records || bytes.saturating_add(incoming) > self.max_bytes {
            return Err(StorageError::Full {
                records,
                bytes,
                max_records: self.max_records,
                max_bytes: self.max_bytes,
            });
        }
        Ok(())
    }
}

/// Store status counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub records: usize,
    pub bytes: u64,
    /// Records removed because they could not be decoded.
    pub quarantined: u64,
    /// Records purged for exceeding the maximum age.
    pub expired: u64,
    /// Stores rejected because a limit was reached.
    pub rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_default() {
        let limits = StoreLimits::default();
        assert_eq!(limits.max_bytes, 10 * 1024 * 1024);
        assert_eq!(limits.max_records, 5000);
        assert_eq!(limits.max_record_age, Duration::from_secs(172_800));
    }

    #[test]
    fn test_limits_check() {
        let limits = StoreLimits {
            max_bytes: 100,
            max_records: 2,
            max_record_age: Duration::from_secs(1),
        };
        limits.check(0, 0, 100).unwrap();
        limits.check(1, 50, 50).unwrap();
        assert!(limits.check(1, 50, 51).unwrap_err().is_full());
        assert!(limits.check(2, 0, 1).unwrap_err().is_full());
    }
}
