//! Configuration snapshots for diagnostics.
//!
//! A snapshot captures the effective configuration a client started with so
//! that stored transmissions and diagnostic logs can be tied back to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pipeline::PipelineConfig;
use crate::resolve::ConfigLocation;

/// Effective configuration a client or command ran with, plus where it
/// came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub taken_at: DateTime<Utc>,
    pub schema_version: String,
    #[serde(default)]
    pub path: Option<String>,
    pub source: String,
    /// Hex SHA-256 of the config's compact JSON form. Location-independent.
    pub config_hash: String,
    pub summary: ConfigSummary,
}

/// The settings an operator usually asks about first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub endpoint: String,
    pub instrumentation_key_set: bool,
    pub buffer_capacity: usize,
    pub backlog_size: usize,
    pub sampling_mode: String,
    pub sampling_percentage: f64,
    pub durable_storage: bool,
    pub live_metrics_enabled: bool,
}

impl ConfigSnapshot {
    pub fn new(config: &PipelineConfig, location: &ConfigLocation) -> Self {
        let compact = serde_json::to_vec(config).unwrap_or_default();
        ConfigSnapshot {
            taken_at: Utc::now(),
            schema_version: config.schema_version.clone(),
            path: location.path.as_ref().map(|p| p.display().to_string()),
            source: location.source.to_string(),
            config_hash: sha256_hex(&compact),
            summary: ConfigSummary {
                endpoint: config.endpoint.clone(),
                instrumentation_key_set: config.instrumentation_key.is_some(),
                buffer_capacity: config.buffer.capacity,
                backlog_size: config.buffer.backlog_size,
                sampling_mode: config.sampling.mode.to_string(),
                sampling_percentage: config.sampling.percentage,
                durable_storage: config.transmission.storage_dir.is_some(),
                live_metrics_enabled: config.live_metrics.enabled,
            },
        }
    }

    /// Whether both snapshots describe the same effective settings.
    pub fn same_settings(&self, other: &ConfigSnapshot) -> bool {
        self.config_hash == other.config_hash
    }

    /// First 12 hex digits of the hash, for log lines.
    pub fn short_id(&self) -> &str {
        &self.config_hash[..12.min(self.config_hash.len())]
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
