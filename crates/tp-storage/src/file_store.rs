//! File-backed transmission store.
//!
//! One file per record, named `<unix-micros>-<uuid>.trn` so that lexical
//! order is arrival order. Records are written to a `.tmp` sibling and then
//! renamed into place, so readers never observe a partial record and two
//! processes sharing the directory never write to the same file.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StorageError;
use crate::record::{decode_record, encode_record, StoredTransmission, Transmission};
use crate::store::{StoreLimits, StoreStats, TransmissionStore};
use crate::RECORD_EXTENSION;

/// Configuration for a [`FileStore`].
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Directory holding the record files.
    pub dir: PathBuf,

    pub limits: StoreLimits,
}

impl FileStoreConfig {
    /// Create config with default limits.
    pub fn new(dir: PathBuf) -> Self {
        FileStoreConfig {
            dir,
            limits: StoreLimits::default(),
        }
    }

    /// Set custom limits.
    pub fn with_limits(mut self, limits: StoreLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[derive(Debug)]
struct Entry {
    key: String,
    path: PathBuf,
    size: u64,
    modified: Option<SystemTime>,
}

/// Durable store of transmissions in a directory.
#[derive(Debug)]
pub struct FileStore {
    config: FileStoreConfig,
    /// Last timestamp used for a record name; serializes in-process stores.
    last_micros: Mutex<u64>,
    quarantined: AtomicU64,
    expired: AtomicU64,
    rejected: AtomicU64,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `config.dir`.
    pub fn open(config: FileStoreConfig) -> Result<Self, StorageError> {
        if config.dir.exists() && !config.dir.is_dir() {
            return Err(StorageError::InvalidPath(format!(
                "{} is not a directory",
                config.dir.display()
            )));
        }
        fs::create_dir_all(&config.dir)?;

        debug!(dir = %config.dir.display(), "opened transmission store");
        Ok(FileStore {
            config,
            last_micros: Mutex::new(0),
            quarantined: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    pub fn limits(&self) -> &StoreLimits {
        &self.config.limits
    }

    /// Committed records, oldest first. Temp files and foreign files are skipped.
    fn entries(&self) -> Result<Vec<Entry>, StorageError> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.config.dir)? {
            let dirent = match dirent {
                Ok(d) => d,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            // A concurrent delete can remove the file between listing and stat.
            let Ok(meta) = dirent.metadata() else {
                continue;
            };
            entries.push(Entry {
                key,
                path,
                size: meta.len(),
                modified: meta.modified().ok(),
            });
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            return Err(StorageError::InvalidPath(format!("invalid record key: {key}")));
        }
        Ok(self.config.dir.join(format!("{key}.{RECORD_EXTENSION}")))
    }

    fn next_key(last_micros: &mut u64) -> String {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        let micros = now.max(*last_micros + 1);
        *last_micros = micros;
        format!("{:020}-{}", micros, Uuid::new_v4().simple())
    }

    fn is_expired(&self, entry: &Entry, now: SystemTime) -> bool {
        entry
            .modified
            .and_then(|m| now.duration_since(m).ok())
            .is_some_and(|age| age > self.config.limits.max_record_age)
    }

    fn remove(path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl TransmissionStore for FileStore {
    fn store(&self, transmission: &Transmission) -> Result<String, StorageError> {
        let encoded = encode_record(transmission)?;

        let mut last_micros = self
            .last_micros
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let entries = self.entries()?;
        let bytes: u64 = entries.iter().map(|e| e.size).sum();
        if let Err(err) = self
            .config
            .limits
            .check(entries.len(), bytes, encoded.len() as u64)
        {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }

        let key = Self::next_key(&mut last_micros);
        let final_path = self.key_path(&key)?;
        let temp_path = final_path.with_extension(format!("{RECORD_EXTENSION}.tmp"));

        let write_result = (|| -> Result<(), StorageError> {
            let mut file = File::create(&temp_path)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
            fs::rename(&temp_path, &final_path)?;
            Ok(())
        })();
        if let Err(err) = write_result {
            let _ = fs::remove_file(&temp_path);
            return Err(err);
        }

        debug!(key = %key, bytes = encoded.len(), "stored transmission");
        Ok(key)
    }

    fn peek(&self) -> Result<Option<StoredTransmission>, StorageError> {
        let now = SystemTime::now();
        for entry in self.entries()? {
            if self.is_expired(&entry, now) {
                Self::remove(&entry.path)?;
                self.expired.fetch_add(1, Ordering::Relaxed);
                info!(key = %entry.key, "purged expired transmission");
                continue;
            }

            let bytes = match fs::read(&entry.path) {
                Ok(b) => b,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            return match decode_record(&bytes) {
                Ok(transmission) => Ok(Some(StoredTransmission {
                    key: entry.key,
                    transmission,
                })),
                Err(source) => Err(StorageError::Corrupt {
                    key: entry.key,
                    source,
                }),
            };
        }
        Ok(None)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        Self::remove(&self.key_path(key)?)
    }

    fn quarantine(&self, key: &str) -> Result<(), StorageError> {
        self.delete(key)?;
        self.quarantined.fetch_add(1, Ordering::Relaxed);
        warn!(key = %key, "quarantined corrupt transmission");
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries()?.len())
    }

    fn size_bytes(&self) -> Result<u64, StorageError> {
        Ok(self.entries()?.iter().map(|e| e.size).sum())
    }

    fn stats(&self) -> Result<StoreStats, StorageError> {
        let entries = self.entries()?;
        Ok(StoreStats {
            records: entries.len(),
            bytes: entries.iter().map(|e| e.size).sum(),
            quarantined: self.quarantined.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        })
    }
}

/// Get the default transmission directory from the XDG data dir.
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("telemetry-pipeline")
        .join("transmissions")
}
