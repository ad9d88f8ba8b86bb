//! First delivery attempt for flushed batches.
//!
//! A batch is serialized and sent once. Retryable failures are persisted to
//! the transmission store and the sender loop is woken; everything else is
//! dropped with a diagnostic. Nothing is returned to the producer.
//!
//! Throttling and `Retry-After` hints feed the [`Backoff`] shared with the
//! sender loop. While its hold is open, batches go straight to the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use tp_common::{SystemClock, TelemetryItem};
use tp_storage::{StorageError, StoreSignal, Transmission, TransmissionStore};

use crate::buffer::BatchSink;
use crate::diagnostics::{event_names, Component, DiagnosticEvent, DiagnosticSink};
use crate::sender::{Backoff, BackoffPolicy};
use crate::serializer::Serializer;
use crate::transport::{ResponseClass, Transport};

/// Transmitter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransmitterStats {
    pub batches: u64,
    pub sent: u64,
    /// Transmissions persisted for retry.
    pub stored: u64,
    /// Batches stored without a send attempt during a backoff hold.
    pub deferred: u64,
    pub dropped_transmissions: u64,
    pub dropped_items: u64,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    sent: AtomicU64,
    stored: AtomicU64,
    deferred: AtomicU64,
    dropped_transmissions: AtomicU64,
    dropped_items: AtomicU64,
}

pub struct Transmitter {
    endpoint: String,
    serializer: Arc<dyn Serializer>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn TransmissionStore>,
    signal: Arc<StoreSignal>,
    diagnostics: Arc<dyn DiagnosticSink>,
    backoff: Arc<Backoff>,
    counters: Counters,
}

impl Transmitter {
    pub fn new(
        endpoint: impl Into<String>,
        serializer: Arc<dyn Serializer>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn TransmissionStore>,
        signal: Arc<StoreSignal>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            serializer,
            transport,
            store,
            signal,
            diagnostics,
            backoff: Arc::new(Backoff::new(
                BackoffPolicy::default(),
                Arc::new(SystemClock::new()),
            )),
            counters: Counters::default(),
        }
    }

    /// Share `backoff` with the sender loop draining the same store.
    pub fn with_backoff(mut self, backoff: Arc<Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn stats(&self) -> TransmitterStats {
        let c = &self.counters;
        TransmitterStats {
            batches: c.batches.load(Ordering::Relaxed),
            sent: c.sent.load(Ordering::Relaxed),
            stored: c.stored.load(Ordering::Relaxed),
            deferred: c.deferred.load(Ordering::Relaxed),
            dropped_transmissions: c.dropped_transmissions.load(Ordering::Relaxed),
            dropped_items: c.dropped_items.load(Ordering::Relaxed),
        }
    }

    fn dropped(&self, items: usize) {
        self.counters
            .dropped_transmissions
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .dropped_items
            .fetch_add(items as u64, Ordering::Relaxed);
    }

    /// Serialize and send one batch.
    pub fn transmit(&self, batch: &[TelemetryItem]) {
        if batch.is_empty() {
            return;
        }
        self.counters.batches.fetch_add(1, Ordering::Relaxed);

        let payload = match self.serializer.serialize(batch) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, items = batch.len(), "failed to serialize batch");
                self.dropped(batch.len());
                self.diagnostics.emit(
                    DiagnosticEvent::warn(
                        event_names::SERIALIZATION_FAILED,
                        Component::Transmitter,
                        format!("batch of {} items dropped: {}", batch.len(), e),
                    )
                    .with_detail("items", batch.len()),
                );
                return;
            }
        };

        let transmission = Transmission::new(
            self.endpoint.clone(),
            self.serializer.content_type(),
            self.serializer.content_encoding().map(str::to_string),
            payload,
        );

        if let Some(remaining) = self.backoff.pending() {
            self.counters.deferred.fetch_add(1, Ordering::Relaxed);
            debug!(
                items = batch.len(),
                remaining_secs = remaining.as_secs_f64(),
                "backoff hold open, storing batch without sending"
            );
            self.persist(&transmission, batch.len(), "backoff", None);
            return;
        }

        let result = self.transport.send(&transmission);
        let class = ResponseClass::of(&result);
        let status = result.as_ref().ok().map(|r| r.status);
        let retry_after: Option<Duration> = result.as_ref().ok().and_then(|r| r.retry_after);
        if matches!(
            class,
            ResponseClass::Success | ResponseClass::Throttled | ResponseClass::Unavailable
        ) {
            self.backoff.record(class, retry_after);
        }

        match class {
            ResponseClass::Success => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                debug!(items = batch.len(), bytes = transmission.len(), "batch sent");
            }
            ResponseClass::Rejected => {
                self.dropped(batch.len());
                self.diagnostics.emit(
                    DiagnosticEvent::warn(
                        event_names::TRANSMISSION_DROPPED,
                        Component::Transmitter,
                        format!("endpoint rejected batch of {} items", batch.len()),
                    )
                    .with_detail("status", status)
                    .with_detail("items", batch.len()),
                );
            }
            ResponseClass::Throttled | ResponseClass::Unavailable | ResponseClass::Transient => {
                if let Err(e) = &result {
                    debug!(error = %e, "send failed, persisting batch");
                }
                self.persist(&transmission, batch.len(), &class.to_string(), status);
            }
        }
    }

    fn persist(
        &self,
        transmission: &Transmission,
        items: usize,
        reason: &str,
        status: Option<u16>,
    ) {
        match self.store.store(transmission) {
            Ok(key) => {
                self.counters.stored.fetch_add(1, Ordering::Relaxed);
                self.signal.notify_stored();
                self.diagnostics.emit(
                    DiagnosticEvent::info(
                        event_names::TRANSMISSION_STORED,
                        Component::Transmitter,
                        format!("batch of {} items stored for retry ({})", items, reason),
                    )
                    .with_detail("key", key)
                    .with_detail("status", status),
                );
            }
            Err(e @ StorageError::Full { .. }) => {
                self.dropped(items);
                self.diagnostics.emit(
                    DiagnosticEvent::warn(
                        event_names::STORAGE_FULL,
                        Component::Storage,
                        format!("batch of {} items dropped: {}", items, e),
                    )
                    .with_detail("items", items),
                );
            }
            Err(e) => {
                self.dropped(items);
                self.diagnostics.emit(
                    DiagnosticEvent::warn(
                        event_names::TRANSMISSION_DROPPED,
                        Component::Storage,
                        format!("batch of {} items could not be stored: {}", items, e),
                    )
                    .with_detail("error_code", e.code()),
                );
            }
        }
    }
}

impl BatchSink for Transmitter {
    fn flush_batch(&self, batch: Vec<TelemetryItem>) {
        self.transmit(&batch);
    }
}
