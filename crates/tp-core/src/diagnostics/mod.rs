//! Pipeline diagnostic events.
//!
//! `track` is fire-and-forget, so operators observe overload, drops and
//! retries only through these events. Events are dispatched to a
//! [`DiagnosticSink`]; the default forwards them to `tracing`, and an
//! in-process [`EventBus`] supports multiple subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{mpsc, Arc, Mutex};

/// Standard diagnostic event names.
pub mod event_names {
    pub const BACKLOG_FULL: &str = "backlog_full";
    pub const TRANSMISSION_STORED: &str = "transmission_stored";
    pub const TRANSMISSION_DROPPED: &str = "transmission_dropped";
    pub const STORAGE_FULL: &str = "storage_full";
    pub const SAMPLING_PERCENTAGE_CHANGED: &str = "sampling_percentage_changed";
    pub const RECORD_QUARANTINED: &str = "record_quarantined";
    pub const SERIALIZATION_FAILED: &str = "serialization_failed";
    pub const SENDER_ERROR: &str = "sender_error";
}

/// Pipeline component that raised an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Buffer,
    Sampling,
    Transmitter,
    Sender,
    Storage,
    Client,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Component::Buffer => "buffer",
            Component::Sampling => "sampling",
            Component::Transmitter => "transmitter",
            Component::Sender => "sender",
            Component::Storage => "storage",
            Component::Client => "client",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured diagnostic event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub component: Component,
    pub level: DiagnosticLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, Value>,
}

impl DiagnosticEvent {
    pub fn new(
        event: impl Into<String>,
        component: Component,
        level: DiagnosticLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event: event.into(),
            timestamp: Utc::now(),
            component,
            level,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    pub fn warn(event: impl Into<String>, component: Component, message: impl Into<String>) -> Self {
        Self::new(event, component, DiagnosticLevel::Warn, message)
    }

    pub fn info(event: impl Into<String>, component: Component, message: impl Into<String>) -> Self {
        Self::new(event, component, DiagnosticLevel::Info, message)
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.insert(key.into(), v);
        }
        self
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","event":"{}"}}"#,
                self.event
            )
        })
    }
}

/// Destination for diagnostic events.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, event: DiagnosticEvent);
}

/// Forwards events to `tracing` at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, event: DiagnosticEvent) {
        let details = if event.details.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&event.details).unwrap_or_default()
        };
        match event.level {
            DiagnosticLevel::Debug => tracing::debug!(
                target: "tp_core::diagnostics",
                event = %event.event,
                component = %event.component,
                details = %details,
                "{}",
                event.message
            ),
            DiagnosticLevel::Info => tracing::info!(
                target: "tp_core::diagnostics",
                event = %event.event,
                component = %event.component,
                details = %details,
                "{}",
                event.message
            ),
            DiagnosticLevel::Warn => tracing::warn!(
                target: "tp_core::diagnostics",
                event = %event.event,
                component = %event.component,
                details = %details,
                "{}",
                event.message
            ),
            DiagnosticLevel::Error => tracing::error!(
                target: "tp_core::diagnostics",
                event = %event.event,
                component = %event.component,
                details = %details,
                "{}",
                event.message
            ),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _event: DiagnosticEvent) {}
}

/// Broadcast event bus supporting multiple subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    senders: Mutex<Vec<mpsc::Sender<DiagnosticEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to receive diagnostic events.
    pub fn subscribe(&self) -> mpsc::Receiver<DiagnosticEvent> {
        let (tx, rx) = mpsc::channel();
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Emit an event to all subscribers, dropping closed ones.
    pub fn emit(&self, event: DiagnosticEvent) {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|sender| sender.send(event.clone()).is_ok());
    }
}

impl DiagnosticSink for EventBus {
    fn emit(&self, event: DiagnosticEvent) {
        EventBus::emit(self, event);
    }
}

/// JSONL writer for diagnostic events.
pub struct JsonlWriter<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> DiagnosticSink for JsonlWriter<W> {
    fn emit(&self, event: DiagnosticEvent) {
        let line = event.to_jsonl();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", line);
        }
    }
}

/// Forwards events to several sinks.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn DiagnosticSink>>) -> Self {
        Self { sinks }
    }
}

impl DiagnosticSink for FanoutSink {
    fn emit(&self, event: DiagnosticEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Default sink used when the caller supplies none.
pub fn default_sink() -> Arc<dyn DiagnosticSink> {
    Arc::new(TracingSink)
}
