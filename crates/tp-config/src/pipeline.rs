//! Pipeline configuration types.
//!
//! Every section carries `#[serde(default)]` so a configuration file only
//! needs to name the options it changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tp_common::{parse_kind_list, Error, TelemetryKind};

use crate::validate::ValidationError;

/// Environment variable overrides for individual options.
pub const ENV_ENDPOINT: &str = "TP_ENDPOINT";
pub const ENV_INSTRUMENTATION_KEY: &str = "TP_INSTRUMENTATION_KEY";
pub const ENV_SAMPLING_PERCENTAGE: &str = "TP_SAMPLING_PERCENTAGE";
pub const ENV_STORAGE_DIR: &str = "TP_STORAGE_DIR";

/// Default ingestion endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://dc.services.visualstudio.com/v2/track";

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Schema version of this file.
    pub schema_version: String,

    /// Ingestion endpoint that receives transmissions.
    pub endpoint: String,

    /// Key stamped on every item that has none.
    pub instrumentation_key: Option<String>,

    pub buffer: BufferSettings,
    pub sampling: SamplingSettings,
    pub transmission: TransmissionSettings,
    pub quota: QuotaSettings,
    pub live_metrics: LiveMetricsSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            instrumentation_key: None,
            buffer: BufferSettings::default(),
            sampling: SamplingSettings::default(),
            transmission: TransmissionSettings::default(),
            quota: QuotaSettings::default(),
            live_metrics: LiveMetricsSettings::default(),
        }
    }
}

/// In-memory buffer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Items per batch; reaching it triggers an immediate flush.
    pub capacity: usize,

    /// Maximum pending items before new arrivals are dropped.
    pub backlog_size: usize,

    /// Longest time an item waits in the buffer before a timed flush.
    pub max_transmission_delay_secs: f64,
}

impl Default for BufferSettings {
    fn default() -> Self {
        BufferSettings {
            capacity: 500,
            backlog_size: 1_000_000,
            max_transmission_delay_secs: 30.0,
        }
    }
}

impl BufferSettings {
    pub fn max_transmission_delay(&self) -> tp_common::Result<Duration> {
        secs("max_transmission_delay_secs", self.max_transmission_delay_secs)
    }
}

/// Which sampling processor the client installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Fixed-rate sampling at `percentage`.
    #[default]
    Fixed,
    /// Rate retuned to keep the post-sampling volume near a target.
    Adaptive,
    /// No sampling processor at all.
    Disabled,
}

impl std::fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplingMode::Fixed => write!(f, "fixed"),
            SamplingMode::Adaptive => write!(f, "adaptive"),
            SamplingMode::Disabled => write!(f, "disabled"),
        }
    }
}

/// Sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    pub mode: SamplingMode,

    /// Fixed sampling percentage, in (0, 100].
    pub percentage: f64,

    /// Semicolon-separated kinds that are never sampled.
    pub excluded_types: String,

    /// Semicolon-separated kinds that are the only ones sampled (empty = all).
    pub included_types: String,

    pub adaptive: AdaptiveSettings,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        SamplingSettings {
            mode: SamplingMode::Fixed,
            percentage: 100.0,
            excluded_types: String::new(),
            included_types: String::new(),
            adaptive: AdaptiveSettings::default(),
        }
    }
}

impl SamplingSettings {
    pub fn excluded_kinds(&self) -> Result<BTreeSet<TelemetryKind>, ValidationError> {
        parse_kinds("sampling.excluded_types", &self.excluded_types)
    }

    pub fn included_kinds(&self) -> Result<BTreeSet<TelemetryKind>, ValidationError> {
        parse_kinds("sampling.included_types", &self.included_types)
    }
}

fn parse_kinds(field: &str, list: &str) -> Result<BTreeSet<TelemetryKind>, ValidationError> {
    parse_kind_list(list).map_err(|e| ValidationError::InvalidValue {
        field: field.to_string(),
        message: e.to_string(),
    })
}

/// Adaptive sampling estimator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    /// Target post-sampling volume.
    pub max_items_per_second: f64,
    pub initial_percentage: f64,
    pub min_percentage: f64,
    pub max_percentage: f64,
    pub evaluation_interval_secs: f64,
    /// Minimum time between a change and a further percentage decrease.
    pub decrease_timeout_secs: f64,
    /// Minimum time between a change and a further percentage increase.
    pub increase_timeout_secs: f64,
    /// Weight of the newest interval in the moving average.
    pub moving_average_ratio: f64,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        AdaptiveSettings {
            max_items_per_second: 5.0,
            initial_percentage: 100.0,
            min_percentage: 0.1,
            max_percentage: 100.0,
            evaluation_interval_secs: 15.0,
            decrease_timeout_secs: 120.0,
            increase_timeout_secs: 900.0,
            moving_average_ratio: 0.25,
        }
    }
}

impl AdaptiveSettings {
    pub fn evaluation_interval(&self) -> tp_common::Result<Duration> {
        secs("evaluation_interval_secs", self.evaluation_interval_secs)
    }

    pub fn decrease_timeout(&self) -> tp_common::Result<Duration> {
        secs("decrease_timeout_secs", self.decrease_timeout_secs)
    }

    pub fn increase_timeout(&self) -> tp_common::Result<Duration> {
        secs("increase_timeout_secs", self.increase_timeout_secs)
    }
}

/// Durable storage and retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionSettings {
    /// Directory for persisted transmissions. `None` keeps them in memory.
    pub storage_dir: Option<PathBuf>,

    pub storage_max_bytes: u64,
    pub storage_max_records: usize,

    /// Persisted transmissions older than this are purged unsent.
    pub max_record_age_secs: u64,

    /// Idle wait and post-success interval of the sender loop.
    pub base_interval_secs: f64,

    /// First wait after a throttled (429) response.
    pub throttle_base_interval_secs: f64,

    /// Upper bound for the throttling backoff.
    pub max_backoff_interval_secs: f64,

    /// Wait after a rejected (400) transmission.
    pub bad_request_interval_secs: f64,
}

impl Default for TransmissionSettings {
    fn default() -> Self {
        TransmissionSettings {
            storage_dir: None,
            storage_max_bytes: 10 * 1024 * 1024, // 10 MiB
            storage_max_records: 5000,
            max_record_age_secs: 48 * 3600,
            base_interval_secs: 10.0,
            throttle_base_interval_secs: 10.0,
            max_backoff_interval_secs: 3600.0,
            bad_request_interval_secs: 5.0,
        }
    }
}

impl TransmissionSettings {
    pub fn base_interval(&self) -> tp_common::Result<Duration> {
        secs("base_interval_secs", self.base_interval_secs)
    }

    pub fn throttle_base_interval(&self) -> tp_common::Result<Duration> {
        secs("throttle_base_interval_secs", self.throttle_base_interval_secs)
    }

    pub fn max_backoff_interval(&self) -> tp_common::Result<Duration> {
        secs("max_backoff_interval_secs", self.max_backoff_interval_secs)
    }

    pub fn bad_request_interval(&self) -> tp_common::Result<Duration> {
        secs("bad_request_interval_secs", self.bad_request_interval_secs)
    }

    pub fn max_record_age(&self) -> Duration {
        Duration::from_secs(self.max_record_age_secs)
    }
}

/// Live-metrics document quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaSettings {
    /// Bucket size; also sets the accrual rate to `max_quota / 60` per second.
    pub max_quota: f64,

    /// Starting balance. Defaults to `max_quota`.
    pub start_quota: Option<f64>,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        QuotaSettings {
            max_quota: 30.0,
            start_quota: None,
        }
    }
}

/// Live-metrics stream settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveMetricsSettings {
    pub enabled: bool,

    /// Sample documents kept per collection window.
    pub max_documents: usize,
}

impl Default for LiveMetricsSettings {
    fn default() -> Self {
        LiveMetricsSettings {
            enabled: true,
            max_documents: 100,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a file. `.toml` files are parsed as TOML,
    /// everything else as JSON.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::parse_toml(&content),
            _ => Self::parse_json(&content),
        }
    }

    /// Parse configuration from a JSON string.
    pub fn parse_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::ParseError(format!("Invalid JSON: {}", e)))
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self, ValidationError> {
        toml::from_str(content)
            .map_err(|e| ValidationError::ParseError(format!("Invalid TOML: {}", e)))
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<Vec<&'static str>, ValidationError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup; returns the variables used.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<Vec<&'static str>, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|v| !v.trim().is_empty()) {
            self.endpoint = endpoint.trim().to_string();
            applied.push(ENV_ENDPOINT);
        }

        if let Some(key) = lookup(ENV_INSTRUMENTATION_KEY).filter(|v| !v.trim().is_empty()) {
            self.instrumentation_key = Some(key.trim().to_string());
            applied.push(ENV_INSTRUMENTATION_KEY);
        }

        if let Some(raw) = lookup(ENV_SAMPLING_PERCENTAGE) {
            let percentage = raw.trim().parse::<f64>().map_err(|_| ValidationError::InvalidValue {
                field: ENV_SAMPLING_PERCENTAGE.to_string(),
                message: format!("not a number: {}", raw),
            })?;
            self.sampling.percentage = percentage;
            applied.push(ENV_SAMPLING_PERCENTAGE);
        }

        if let Some(dir) = lookup(ENV_STORAGE_DIR).filter(|v| !v.trim().is_empty()) {
            self.transmission.storage_dir = Some(PathBuf::from(dir));
            applied.push(ENV_STORAGE_DIR);
        }

        Ok(applied)
    }
}

/// Convert a seconds option, rejecting values no `Duration` can hold.
fn secs(field: &'static str, value: f64) -> tp_common::Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| Error::OutOfRange {
        field,
        value: value.to_string(),
        message: e.to_string(),
    })
}
