//! Telemetry pipeline configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for the pipeline configuration file (TOML or JSON)
//! - Config resolution (CLI → env → XDG → system → defaults)
//! - Environment variable overrides for individual options
//! - Semantic validation with stable error codes
//! - Config snapshots for diagnostics

pub mod pipeline;
pub mod resolve;
pub mod snapshot;
pub mod validate;

pub use pipeline::{
    AdaptiveSettings, BufferSettings, LiveMetricsSettings, PipelineConfig, QuotaSettings,
    SamplingMode, SamplingSettings, TransmissionSettings,
};
pub use resolve::{load_config, resolve_config, ConfigLocation, ConfigSource};
pub use snapshot::ConfigSnapshot;
pub use validate::{validate_config, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Smallest permitted backlog size.
pub const MIN_BACKLOG_SIZE: usize = 1001;

/// Longest accepted delay, interval or timeout option, in seconds (one year).
pub const MAX_INTERVAL_SECS: f64 = 365.0 * 86_400.0;
