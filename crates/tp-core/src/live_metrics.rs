//! Live metrics stream.
//!
//! Sits at the head of the processing chain, before sampling, so its
//! counters reflect every tracked item. Sample documents are rate-limited by
//! a [`QuotaTracker`] and kept in a bounded ring until the next `collect`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

use tp_common::{Clock, Result, TelemetryItem, TelemetryKind};
use tp_config::{LiveMetricsSettings, QuotaSettings};

use crate::processor::TelemetryProcessor;
use crate::quota::QuotaTracker;

/// Compact copy of an item kept for the live view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveDocument {
    pub kind: TelemetryKind,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    pub failed: bool,
}

impl LiveDocument {
    fn from_item(item: &TelemetryItem) -> Self {
        Self {
            kind: item.kind(),
            timestamp: item.timestamp,
            name: item.data.identity().to_string(),
            operation_id: item.context.operation_id.clone(),
            duration_ms: item.duration_ms(),
            failed: item.is_failure(),
        }
    }
}

/// Counters and documents for one collection window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveMetricsSample {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub items: u64,
    pub requests: u64,
    pub failed_requests: u64,
    pub request_duration_ms: f64,
    pub dependencies: u64,
    pub failed_dependencies: u64,
    pub dependency_duration_ms: f64,
    pub exceptions: u64,
    pub documents: Vec<LiveDocument>,
    /// Documents skipped because the quota was exhausted.
    pub quota_dropped: u64,
}

#[derive(Debug)]
struct Window {
    start: DateTime<Utc>,
    items: u64,
    requests: u64,
    failed_requests: u64,
    request_duration_ms: f64,
    dependencies: u64,
    failed_dependencies: u64,
    dependency_duration_ms: f64,
    exceptions: u64,
    documents: VecDeque<LiveDocument>,
    quota_dropped: u64,
}

impl Window {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            items: 0,
            requests: 0,
            failed_requests: 0,
            request_duration_ms: 0.0,
            dependencies: 0,
            failed_dependencies: 0,
            dependency_duration_ms: 0.0,
            exceptions: 0,
            documents: VecDeque::new(),
            quota_dropped: 0,
        }
    }

    fn count(&mut self, item: &TelemetryItem) {
        self.items += 1;
        let duration = item.duration_ms().unwrap_or(0.0);
        match item.kind() {
            TelemetryKind::Request => {
                self.requests += 1;
                self.request_duration_ms += duration;
                if item.is_failure() {
                    self.failed_requests += 1;
                }
            }
            TelemetryKind::Dependency => {
                self.dependencies += 1;
                self.dependency_duration_ms += duration;
                if item.is_failure() {
                    self.failed_dependencies += 1;
                }
            }
            TelemetryKind::Exception => self.exceptions += 1,
            _ => {}
        }
    }
}

pub struct LiveMetricsStream {
    enabled: AtomicBool,
    max_documents: usize,
    quota: QuotaTracker,
    clock: Arc<dyn Clock>,
    window: Mutex<Window>,
    next: Arc<dyn TelemetryProcessor>,
}

impl LiveMetricsStream {
    pub fn new(
        settings: &LiveMetricsSettings,
        quota: &QuotaSettings,
        next: Arc<dyn TelemetryProcessor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let tracker = QuotaTracker::new(quota, Arc::clone(&clock))?;
        let start = clock.now();
        Ok(Self {
            enabled: AtomicBool::new(settings.enabled),
            max_documents: settings.max_documents,
            quota: tracker,
            clock,
            window: Mutex::new(Window::new(start)),
            next,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    fn record(&self, item: &TelemetryItem) {
        // Quota is consulted outside the window lock; it is lock-free.
        let document = (item.kind() != TelemetryKind::Metric).then(|| self.quota.apply_quota());

        let mut window = self.lock();
        window.count(item);
        match document {
            Some(true) if self.max_documents > 0 => {
                if window.documents.len() >= self.max_documents {
                    window.documents.pop_front();
                }
                window.documents.push_back(LiveDocument::from_item(item));
            }
            Some(false) => {
                window.quota_dropped += 1;
                trace!(kind = %item.kind(), "live document skipped, quota exhausted");
            }
            _ => {}
        }
    }

    /// Drain the current window and start a new one.
    pub fn collect(&self) -> LiveMetricsSample {
        let now = self.clock.now();
        let window = std::mem::replace(&mut *self.lock(), Window::new(now));
        LiveMetricsSample {
            window_start: window.start,
            window_end: now,
            items: window.items,
            requests: window.requests,
            failed_requests: window.failed_requests,
            request_duration_ms: window.request_duration_ms,
            dependencies: window.dependencies,
            failed_dependencies: window.failed_dependencies,
            dependency_duration_ms: window.dependency_duration_ms,
            exceptions: window.exceptions,
            documents: window.documents.into(),
            quota_dropped: window.quota_dropped,
        }
    }
}

impl TelemetryProcessor for LiveMetricsStream {
    fn process(&self, item: TelemetryItem) -> Result<()> {
        if self.is_enabled() {
            self.record(&item);
        }
        self.next.process(item)
    }
}
