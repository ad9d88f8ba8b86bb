//! Telemetry item data model.
//!
//! A [`TelemetryItem`] is one discrete observation: a request, dependency
//! call, exception, trace line, custom event, metric or page view. Common
//! attributes (timestamp, operation context, properties, sampling rate) live
//! on the item; variant-specific fields live in [`TelemetryData`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::kind::TelemetryKind;

/// Trace and exception severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Verbose,
    Information,
    Warning,
    Error,
    Critical,
}

/// Correlation fields shared by all telemetry of one logical operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    /// Root operation id. Items sharing it get the same sampling decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestData {
    #[serde(default = "new_item_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default)]
    pub response_code: String,
    #[serde(default = "default_true")]
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyData {
    #[serde(default = "new_item_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Command text, e.g. the SQL statement or full URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(default = "default_true")]
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionData {
    pub type_name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<SeverityLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceData {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<SeverityLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub measurements: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageViewData {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

/// Variant-specific telemetry payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryData {
    Request(RequestData),
    Dependency(DependencyData),
    Exception(ExceptionData),
    Trace(TraceData),
    Event(EventData),
    Metric(MetricData),
    PageView(PageViewData),
}

impl TelemetryData {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            TelemetryData::Request(_) => TelemetryKind::Request,
            TelemetryData::Dependency(_) => TelemetryKind::Dependency,
            TelemetryData::Exception(_) => TelemetryKind::Exception,
            TelemetryData::Trace(_) => TelemetryKind::Trace,
            TelemetryData::Event(_) => TelemetryKind::Event,
            TelemetryData::Metric(_) => TelemetryKind::Metric,
            TelemetryData::PageView(_) => TelemetryKind::PageView,
        }
    }

    /// The field that identifies the item (name, message or exception type).
    pub fn identity(&self) -> &str {
        match self {
            TelemetryData::Request(d) => &d.name,
            TelemetryData::Dependency(d) => &d.name,
            TelemetryData::Exception(d) => &d.type_name,
            TelemetryData::Trace(d) => &d.message,
            TelemetryData::Event(d) => &d.name,
            TelemetryData::Metric(d) => &d.name,
            TelemetryData::PageView(d) => &d.name,
        }
    }
}

/// One discrete telemetry observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryItem {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrumentation_key: Option<String>,

    #[serde(default)]
    pub context: OperationContext,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,

    /// Sampling percentage applied upstream. Set at most once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sampling_percentage: Option<f64>,

    pub data: TelemetryData,
}

impl TelemetryItem {
    pub fn new(data: TelemetryData) -> Self {
        Self {
            timestamp: Utc::now(),
            instrumentation_key: None,
            context: OperationContext::default(),
            properties: BTreeMap::new(),
            sampling_percentage: None,
            data,
        }
    }

    pub fn event(name: impl Into<String>) -> Self {
        Self::new(TelemetryData::Event(EventData {
            name: name.into(),
            measurements: BTreeMap::new(),
        }))
    }

    pub fn trace(message: impl Into<String>, severity: Option<SeverityLevel>) -> Self {
        Self::new(TelemetryData::Trace(TraceData {
            message: message.into(),
            severity,
        }))
    }

    pub fn request(
        name: impl Into<String>,
        duration_ms: f64,
        response_code: impl Into<String>,
        success: bool,
    ) -> Self {
        Self::new(TelemetryData::Request(RequestData {
            id: new_item_id(),
            name: name.into(),
            url: None,
            duration_ms,
            response_code: response_code.into(),
            success,
        }))
    }

    pub fn dependency(
        name: impl Into<String>,
        target: Option<String>,
        duration_ms: f64,
        success: bool,
    ) -> Self {
        Self::new(TelemetryData::Dependency(DependencyData {
            id: new_item_id(),
            name: name.into(),
            dependency_type: None,
            target,
            data: None,
            duration_ms,
            result_code: None,
            success,
        }))
    }

    pub fn exception(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(TelemetryData::Exception(ExceptionData {
            type_name: type_name.into(),
            message: message.into(),
            stack: None,
            severity: Some(SeverityLevel::Error),
        }))
    }

    pub fn metric(name: impl Into<String>, value: f64) -> Self {
        Self::new(TelemetryData::Metric(MetricData {
            name: name.into(),
            value,
            count: None,
            min: None,
            max: None,
        }))
    }

    pub fn page_view(name: impl Into<String>, url: Option<String>) -> Self {
        Self::new(TelemetryData::PageView(PageViewData {
            name: name.into(),
            url,
            duration_ms: None,
        }))
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.context.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.context.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.context.user_id = Some(user_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn kind(&self) -> TelemetryKind {
        self.data.kind()
    }

    pub fn sampling_percentage(&self) -> Option<f64> {
        self.sampling_percentage
    }

    /// Record the sampling percentage applied to this item.
    ///
    /// Returns `false` and leaves the item untouched if a percentage was
    /// already recorded upstream.
    pub fn set_sampling_percentage(&mut self, percentage: f64) -> bool {
        if self.sampling_percentage.is_some() {
            return false;
        }
        self.sampling_percentage = Some(percentage);
        true
    }

    /// Key used for correlated sampling decisions.
    pub fn correlation_key(&self) -> Option<&str> {
        self.context
            .operation_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| self.context.user_id.as_deref().filter(|id| !id.is_empty()))
    }

    /// Whether the item represents a failed operation.
    pub fn is_failure(&self) -> bool {
        match &self.data {
            TelemetryData::Request(d) => !d.success,
            TelemetryData::Dependency(d) => !d.success,
            TelemetryData::Exception(_) => true,
            _ => false,
        }
    }

    /// Duration of requests, dependencies and timed page views.
    pub fn duration_ms(&self) -> Option<f64> {
        match &self.data {
            TelemetryData::Request(d) => Some(d.duration_ms),
            TelemetryData::Dependency(d) => Some(d.duration_ms),
            TelemetryData::PageView(d) => d.duration_ms,
            _ => None,
        }
    }

    /// Check the item's required identity field.
    ///
    /// Optional fields are never validated.
    pub fn validate(&self) -> Result<()> {
        if self.data.identity().trim().is_empty() {
            let field = match self.kind() {
                TelemetryKind::Trace => "message",
                TelemetryKind::Exception => "type_name",
                _ => "name",
            };
            return Err(Error::InvalidItem(format!(
                "{} item has an empty {}",
                self.kind(),
                field
            )));
        }
        Ok(())
    }
}

/// Generate an id for a request or dependency.
pub fn new_item_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_string()
}

fn default_true() -> bool {
    true
}
