//! Durable transmission storage for the telemetry pipeline.
//!
//! This crate provides:
//! - The [`Transmission`] record and its on-disk encoding
//! - The [`TransmissionStore`] queue contract (store / peek / delete)
//! - A file-backed store with atomic writes, capacity limits and age retention
//! - An in-memory store with the same limits
//! - [`StoreSignal`], the wake-up channel between producers and the sender

pub mod error;
pub mod file_store;
pub mod memory;
pub mod record;
pub mod signal;
pub mod store;

pub use error::{DecodeError, StorageError};
pub use file_store::{default_storage_dir, FileStore, FileStoreConfig};
pub use memory::MemoryStore;
pub use record::{decode_record, encode_record, StoredTransmission, Transmission};
pub use signal::{StoreSignal, Wake};
pub use store::{StoreLimits, StoreStats, TransmissionStore};

/// Record format version written into every header line.
pub const RECORD_FORMAT_VERSION: u32 = 1;

/// File extension of committed records.
pub const RECORD_EXTENSION: &str = "trn";
