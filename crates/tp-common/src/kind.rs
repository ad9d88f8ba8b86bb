//! Telemetry type tags.
//!
//! Tags drive sampling inclusion/exclusion. Configuration names them as
//! semicolon-separated, case-insensitive lists such as `"Request;Dependency"`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Discriminator for the telemetry item variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    Request,
    Dependency,
    Exception,
    Trace,
    Event,
    Metric,
    PageView,
}

impl TelemetryKind {
    /// All kinds, in declaration order.
    pub const ALL: [TelemetryKind; 7] = [
        TelemetryKind::Request,
        TelemetryKind::Dependency,
        TelemetryKind::Exception,
        TelemetryKind::Trace,
        TelemetryKind::Event,
        TelemetryKind::Metric,
        TelemetryKind::PageView,
    ];

    /// Canonical configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryKind::Request => "Request",
            TelemetryKind::Dependency => "Dependency",
            TelemetryKind::Exception => "Exception",
            TelemetryKind::Trace => "Trace",
            TelemetryKind::Event => "Event",
            TelemetryKind::Metric => "Metric",
            TelemetryKind::PageView => "PageView",
        }
    }

    /// Envelope name used on the wire.
    pub fn envelope_name(&self) -> &'static str {
        match self {
            TelemetryKind::Request => "Request",
            TelemetryKind::Dependency => "RemoteDependency",
            TelemetryKind::Exception => "Exception",
            TelemetryKind::Trace => "Message",
            TelemetryKind::Event => "Event",
            TelemetryKind::Metric => "Metric",
            TelemetryKind::PageView => "PageView",
        }
    }

    /// Whether items of this kind may be dropped by sampling.
    ///
    /// Metrics are pre-aggregated and never sampled.
    pub fn supports_sampling(&self) -> bool {
        !matches!(self, TelemetryKind::Metric)
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TelemetryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request" => Ok(TelemetryKind::Request),
            "dependency" => Ok(TelemetryKind::Dependency),
            "exception" => Ok(TelemetryKind::Exception),
            "trace" => Ok(TelemetryKind::Trace),
            "event" => Ok(TelemetryKind::Event),
            "metric" => Ok(TelemetryKind::Metric),
            "pageview" | "page_view" => Ok(TelemetryKind::PageView),
            other => Err(Error::UnknownTelemetryType(other.to_string())),
        }
    }
}

/// Parse a semicolon-separated list of type tags.
///
/// Blank entries are skipped, so `""` and `"Request;;"` are both valid.
pub fn parse_kind_list(list: &str) -> Result<BTreeSet<TelemetryKind>, Error> {
    list.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(TelemetryKind::from_str)
        .collect()
}

/// Format a set of type tags back into the configuration syntax.
pub fn format_kind_list(kinds: &BTreeSet<TelemetryKind>) -> String {
    kinds
        .iter()
        .map(TelemetryKind::as_str)
        .collect::<Vec<_>>()
        .join(";")
}
