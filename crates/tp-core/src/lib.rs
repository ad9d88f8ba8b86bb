//! Telemetry Pipeline Core Library
//!
//! This library provides the client-side telemetry pipeline:
//! - Bounded in-memory buffering with size- and time-based flushes
//! - Fixed-rate and adaptive sampling with correlated decisions
//! - A lock-free quota for the live metrics stream
//! - First-attempt transmission with durable storage on failure
//! - A sender loop that retries stored transmissions with backoff
//! - Structured logging and diagnostic events
//!
//! The binary entry point is in `main.rs`.

pub mod buffer;
pub mod client;
pub mod correlation;
pub mod diagnostics;
pub mod exit_codes;
pub mod live_metrics;
pub mod logging;
pub mod periodic;
pub mod processor;
pub mod quota;
pub mod sampling;
pub mod sender;
pub mod serializer;
pub mod transmitter;
pub mod transport;

pub use buffer::{BatchSink, BufferStats, TelemetryBuffer};
pub use client::{ClientStats, TelemetryClient, TelemetryClientBuilder};
pub use correlation::CorrelationCache;
pub use diagnostics::{DiagnosticEvent, DiagnosticSink};
pub use live_metrics::{LiveMetricsSample, LiveMetricsStream};
pub use processor::TelemetryProcessor;
pub use quota::QuotaTracker;
pub use sampling::{AdaptiveSamplingProcessor, FixedRateSampler, Sampler};
pub use sender::{Backoff, BackoffPolicy, SendOutcome, SenderLoop, Step};
pub use serializer::{JsonLinesSerializer, Serializer};
pub use transmitter::Transmitter;
pub use transport::{ResponseClass, Transport, TransportError, TransportResponse};
