//! Configuration validation errors and semantic validation.

use thiserror::Error;

use crate::pipeline::{PipelineConfig, SamplingMode};
use crate::{MAX_INTERVAL_SECS, MIN_BACKLOG_SIZE};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::SemanticError(_) => 63,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }

    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<ValidationError> for tp_common::Error {
    fn from(err: ValidationError) -> Self {
        tp_common::Error::Config(err.to_string())
    }
}

/// Validate a pipeline configuration semantically.
pub fn validate_config(config: &PipelineConfig) -> ValidationResult<()> {
    if config.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    if config.endpoint.trim().is_empty() {
        return Err(ValidationError::invalid("endpoint", "must not be empty"));
    }

    validate_buffer(config)?;
    validate_sampling(config)?;
    validate_transmission(config)?;
    validate_quota(config)?;

    Ok(())
}

fn validate_buffer(config: &PipelineConfig) -> ValidationResult<()> {
    let buffer = &config.buffer;

    if buffer.capacity < 1 {
        return Err(ValidationError::invalid(
            "buffer.capacity",
            format!("Must be at least 1, got {}", buffer.capacity),
        ));
    }

    if buffer.backlog_size < MIN_BACKLOG_SIZE {
        return Err(ValidationError::invalid(
            "buffer.backlog_size",
            format!(
                "Must be at least {}, got {}",
                MIN_BACKLOG_SIZE, buffer.backlog_size
            ),
        ));
    }

    if buffer.capacity > buffer.backlog_size {
        return Err(ValidationError::SemanticError(format!(
            "buffer.capacity ({}) must not exceed buffer.backlog_size ({})",
            buffer.capacity, buffer.backlog_size
        )));
    }

    validate_interval(
        "buffer.max_transmission_delay_secs",
        buffer.max_transmission_delay_secs,
    )?;

    Ok(())
}

fn validate_sampling(config: &PipelineConfig) -> ValidationResult<()> {
    let sampling = &config.sampling;

    validate_percentage("sampling.percentage", sampling.percentage)?;
    sampling.excluded_kinds()?;
    sampling.included_kinds()?;

    if sampling.mode != SamplingMode::Adaptive {
        return Ok(());
    }

    let adaptive = &sampling.adaptive;
    validate_percentage("sampling.adaptive.min_percentage", adaptive.min_percentage)?;
    validate_percentage("sampling.adaptive.max_percentage", adaptive.max_percentage)?;
    validate_percentage(
        "sampling.adaptive.initial_percentage",
        adaptive.initial_percentage,
    )?;

    if adaptive.min_percentage > adaptive.initial_percentage
        || adaptive.initial_percentage > adaptive.max_percentage
    {
        return Err(ValidationError::SemanticError(format!(
            "adaptive percentages must satisfy min <= initial <= max, got {} <= {} <= {}",
            adaptive.min_percentage, adaptive.initial_percentage, adaptive.max_percentage
        )));
    }

    if !(adaptive.max_items_per_second > 0.0) {
        return Err(ValidationError::invalid(
            "sampling.adaptive.max_items_per_second",
            format!("Must be positive, got {}", adaptive.max_items_per_second),
        ));
    }

    validate_interval(
        "sampling.adaptive.evaluation_interval_secs",
        adaptive.evaluation_interval_secs,
    )?;
    for (field, value) in [
        (
            "sampling.adaptive.decrease_timeout_secs",
            adaptive.decrease_timeout_secs,
        ),
        (
            "sampling.adaptive.increase_timeout_secs",
            adaptive.increase_timeout_secs,
        ),
    ] {
        if !(value >= 0.0 && value <= MAX_INTERVAL_SECS) {
            return Err(ValidationError::invalid(
                field,
                format!("Must be in [0, {}], got {}", MAX_INTERVAL_SECS, value),
            ));
        }
    }

    if !(adaptive.moving_average_ratio > 0.0 && adaptive.moving_average_ratio <= 1.0) {
        return Err(ValidationError::invalid(
            "sampling.adaptive.moving_average_ratio",
            format!("Must be in (0, 1], got {}", adaptive.moving_average_ratio),
        ));
    }

    Ok(())
}

fn validate_percentage(field: &str, value: f64) -> ValidationResult<()> {
    if !(value > 0.0 && value <= 100.0) {
        return Err(ValidationError::invalid(
            field,
            format!("Must be in (0, 100], got {}", value),
        ));
    }
    Ok(())
}

/// Delays and intervals: positive and no longer than [`MAX_INTERVAL_SECS`].
fn validate_interval(field: &str, value: f64) -> ValidationResult<()> {
    if !(value > 0.0 && value <= MAX_INTERVAL_SECS) {
        return Err(ValidationError::invalid(
            field,
            format!("Must be in (0, {}], got {}", MAX_INTERVAL_SECS, value),
        ));
    }
    Ok(())
}

fn validate_transmission(config: &PipelineConfig) -> ValidationResult<()> {
    let tx = &config.transmission;

    for (field, value) in [
        ("transmission.base_interval_secs", tx.base_interval_secs),
        (
            "transmission.throttle_base_interval_secs",
            tx.throttle_base_interval_secs,
        ),
        (
            "transmission.max_backoff_interval_secs",
            tx.max_backoff_interval_secs,
        ),
        (
            "transmission.bad_request_interval_secs",
            tx.bad_request_interval_secs,
        ),
    ] {
        validate_interval(field, value)?;
    }

    if tx.throttle_base_interval_secs > tx.max_backoff_interval_secs {
        return Err(ValidationError::SemanticError(format!(
            "transmission.throttle_base_interval_secs ({}) must not exceed max_backoff_interval_secs ({})",
            tx.throttle_base_interval_secs, tx.max_backoff_interval_secs
        )));
    }

    if tx.storage_max_bytes == 0 {
        return Err(ValidationError::invalid(
            "transmission.storage_max_bytes",
            "Must be positive",
        ));
    }

    if tx.storage_max_records == 0 {
        return Err(ValidationError::invalid(
            "transmission.storage_max_records",
            "Must be positive",
        ));
    }

    Ok(())
}

fn validate_quota(config: &PipelineConfig) -> ValidationResult<()> {
    let quota = &config.quota;

    if !(quota.max_quota > 0.0) || !quota.max_quota.is_finite() {
        return Err(ValidationError::invalid(
            "quota.max_quota",
            format!("Must be positive, got {}", quota.max_quota),
        ));
    }

    if let Some(start) = quota.start_quota {
        if !(start >= 0.0) || start > quota.max_quota {
            return Err(ValidationError::invalid(
                "quota.start_quota",
                format!("Must be in [0, {}], got {}", quota.max_quota, start),
            ));
        }
    }

    Ok(())
}
