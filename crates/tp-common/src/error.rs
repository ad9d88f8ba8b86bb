//! Error types for the telemetry pipeline.
//!
//! Errors surface only at the synchronous pipeline boundary: invalid items
//! handed to `track`/`process` and out-of-range configuration. Transmission
//! failures never reach the producer; they are reported through the
//! diagnostic sink instead.
//!
//! Errors serialize to structured JSON for the CLI:
//! ```json
//! {
//!   "code": 11,
//!   "category": "config",
//!   "message": "capacity out of range: 0 (must be at least 1)",
//!   "recoverable": true
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration values and option parsing.
    Config,
    /// Telemetry items handed to the pipeline.
    Input,
    /// Pipeline lifecycle and serialization.
    Pipeline,
    /// Durable transmission storage.
    Storage,
    /// Network transport.
    Transport,
    /// File I/O and JSON errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Input => write!(f, "input"),
            ErrorCategory::Pipeline => write!(f, "pipeline"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for the telemetry pipeline.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{field} out of range: {value} ({message})")]
    OutOfRange {
        field: &'static str,
        value: String,
        message: String,
    },

    #[error("inconsistent configuration: {0}")]
    InconsistentConfig(String),

    #[error("unknown telemetry type: {0}")]
    UnknownTelemetryType(String),

    // Input errors (20-29)
    #[error("invalid telemetry item: {0}")]
    InvalidItem(String),

    // Pipeline errors (30-39)
    #[error("pipeline is shut down")]
    ShutDown,

    #[error("serialization failed: {0}")]
    Serialization(String),

    // Storage errors (40-49)
    #[error("storage error: {0}")]
    Storage(String),

    // Transport errors (50-59)
    #[error("transport error: {0}")]
    Transport(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Input errors
    /// - 30-39: Pipeline errors
    /// - 40-49: Storage errors
    /// - 50-59: Transport errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::OutOfRange { .. } => 11,
            Error::InconsistentConfig(_) => 12,
            Error::UnknownTelemetryType(_) => 13,
            Error::InvalidItem(_) => 20,
            Error::ShutDown => 30,
            Error::Serialization(_) => 31,
            Error::Storage(_) => 40,
            Error::Transport(_) => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_)
            | Error::OutOfRange { .. }
            | Error::InconsistentConfig(_)
            | Error::UnknownTelemetryType(_) => ErrorCategory::Config,

            Error::InvalidItem(_) => ErrorCategory::Input,

            Error::ShutDown | Error::Serialization(_) => ErrorCategory::Pipeline,

            Error::Storage(_) => ErrorCategory::Storage,

            Error::Transport(_) => ErrorCategory::Transport,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Config errors: recoverable by fixing the configuration
            Error::Config(_)
            | Error::OutOfRange { .. }
            | Error::InconsistentConfig(_)
            | Error::UnknownTelemetryType(_) => true,

            // The item itself is broken; resending it cannot help
            Error::InvalidItem(_) => false,

            Error::ShutDown => false,
            Error::Serialization(_) => false,

            Error::Storage(_) => true,
            Error::Transport(_) => true,

            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::OutOfRange { .. } => "Configuration Value Out Of Range",
            Error::InconsistentConfig(_) => "Inconsistent Configuration",
            Error::UnknownTelemetryType(_) => "Unknown Telemetry Type",
            Error::InvalidItem(_) => "Invalid Telemetry Item",
            Error::ShutDown => "Pipeline Shut Down",
            Error::Serialization(_) => "Serialization Failed",
            Error::Storage(_) => "Storage Error",
            Error::Transport(_) => "Transport Error",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::OutOfRange { .. } | Error::InconsistentConfig(_) => {
                "Run 'tp-core config check' to validate the configuration file."
            }
            Error::UnknownTelemetryType(_) => {
                "Use Request, Dependency, Exception, Trace, Event, Metric or PageView, separated by ';'."
            }
            Error::InvalidItem(_) => {
                "Set the item's required name (message for traces, type name for exceptions)."
            }
            Error::ShutDown => "Create a new client; a shut down pipeline accepts no more items.",
            Error::Serialization(_) => "Check telemetry properties for values that cannot be encoded.",
            Error::Storage(_) => {
                "Check free disk space and permissions of the transmission storage directory."
            }
            Error::Transport(_) => "Check network connectivity and the configured endpoint.",
            Error::Io(_) => "Check disk space and permissions. Retry the operation.",
            Error::Json(_) => "Invalid JSON input. Check syntax with 'jq .' before retrying.",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Additional structured context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        if let Error::OutOfRange { field, value, .. } = err {
            context.insert("field".to_string(), serde_json::json!(field));
            context.insert("value".to_string(), serde_json::json!(value));
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

/// Format an error for human-readable stderr output.
///
/// Output format:
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        red = red,
        cyan = cyan,
        reset = reset,
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}
