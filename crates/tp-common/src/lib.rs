//! Telemetry pipeline common types, clock, and errors.
//!
//! This crate provides foundational types shared across the pipeline crates:
//! - The telemetry item data model and its type tags
//! - An injectable clock for deterministic timing in tests
//! - The pipeline boundary error type with stable codes

pub mod clock;
pub mod error;
pub mod item;
pub mod kind;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use item::{
    DependencyData, EventData, ExceptionData, MetricData, OperationContext, PageViewData,
    RequestData, SeverityLevel, TelemetryData, TelemetryItem, TraceData,
};
pub use kind::{format_kind_list, parse_kind_list, TelemetryKind};
