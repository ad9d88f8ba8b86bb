//! Sender loop draining the transmission store.
//!
//! Each step peeks the oldest stored transmission, sends it and applies the
//! retry policy:
//!
//! | Response                          | Record  | Next interval                         |
//! |-----------------------------------|---------|---------------------------------------|
//! | 2xx                               | deleted | base, next step runs immediately      |
//! | 429                               | deleted | throttle base, doubling per 429, capped |
//! | 503                               | kept    | unchanged                             |
//! | 400 / other 4xx                   | deleted | bad-request interval                  |
//! | network, 408, 500, 502, 504       | kept    | unchanged                             |
//!
//! The record is deleted only after the send, so a crash in between
//! redelivers it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use tp_common::{Clock, Result, SystemClock};
use tp_config::TransmissionSettings;
use tp_storage::{StorageError, StoreSignal, TransmissionStore, Wake};

use crate::diagnostics::{event_names, Component, DiagnosticEvent, DiagnosticSink};
use crate::transport::{ResponseClass, Transport};

/// Retry intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub throttle_base: Duration,
    pub max_backoff: Duration,
    pub bad_request: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(10),
            throttle_base: Duration::from_secs(10),
            max_backoff: Duration::from_secs(3600),
            bad_request: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn from_settings(settings: &TransmissionSettings) -> Result<Self> {
        Ok(Self {
            base: settings.base_interval()?,
            throttle_base: settings.throttle_base_interval()?,
            max_backoff: settings.max_backoff_interval()?,
            bad_request: settings.bad_request_interval()?,
        })
    }
}

/// Interval state carried between steps.
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: BackoffPolicy,
    interval: Duration,
    throttle_streak: u32,
}

impl BackoffState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            interval: policy.base,
            throttle_streak: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Apply a send result and return the next interval.
    pub fn apply(&mut self, class: ResponseClass, retry_after: Option<Duration>) -> Duration {
        match class {
            ResponseClass::Success => {
                self.throttle_streak = 0;
                self.interval = self.policy.base;
            }
            ResponseClass::Throttled => {
                self.interval = if self.throttle_streak == 0 {
                    self.policy.throttle_base
                } else {
                    self.interval.saturating_mul(2)
                }
                .min(self.policy.max_backoff);
                self.throttle_streak += 1;
            }
            ResponseClass::Unavailable | ResponseClass::Transient => {
                self.throttle_streak = 0;
            }
            ResponseClass::Rejected => {
                self.throttle_streak = 0;
                self.interval = self.policy.bad_request;
            }
        }

        if matches!(class, ResponseClass::Throttled | ResponseClass::Unavailable) {
            if let Some(hint) = retry_after {
                self.interval = self.interval.max(hint.min(self.policy.max_backoff));
            }
        }
        self.interval
    }
}

/// Backoff shared by the transmitter and the sender loop.
///
/// A 429, or a `Retry-After` hint on a 503, opens a hold lasting the
/// resulting interval. While it is open the transmitter stores new batches
/// instead of sending them and the sender loop does not send.
pub struct Backoff {
    clock: Arc<dyn Clock>,
    inner: Mutex<Held>,
}

#[derive(Debug)]
struct Held {
    state: BackoffState,
    resume_at: Option<Duration>,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(Held {
                state: BackoffState::new(policy),
                resume_at: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Held> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.lock().state.policy
    }

    pub fn interval(&self) -> Duration {
        self.lock().state.interval()
    }

    /// Apply a send result; returns the next interval.
    pub fn record(&self, class: ResponseClass, retry_after: Option<Duration>) -> Duration {
        let now = self.clock.elapsed();
        let mut held = self.lock();
        let interval = held.state.apply(class, retry_after);
        let holds = class == ResponseClass::Throttled
            || (class == ResponseClass::Unavailable && retry_after.is_some());
        if holds {
            let until = now.saturating_add(interval);
            held.resume_at = Some(held.resume_at.map_or(until, |at| at.max(until)));
        } else if class == ResponseClass::Success {
            held.resume_at = None;
        }
        interval
    }

    /// Time left before sending may resume, if a hold is open.
    pub fn pending(&self) -> Option<Duration> {
        let now = self.clock.elapsed();
        let mut held = self.lock();
        match held.resume_at {
            Some(at) if at > now => Some(at - now),
            Some(_) => {
                held.resume_at = None;
                None
            }
            None => None,
        }
    }
}

/// What one step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    /// Nothing stored.
    Idle,
    Sent,
    /// 429; the record was dropped.
    Throttled,
    /// 503; the record was kept.
    Unavailable,
    /// 400 or another non-retryable status; the record was dropped.
    Rejected,
    /// Network failure or retryable 5xx; the record was kept.
    Transient,
    /// The record could not be decoded and was removed.
    Quarantined,
    /// The store failed; nothing was sent.
    StoreError,
}

impl SendOutcome {
    fn from_class(class: ResponseClass) -> Self {
        match class {
            ResponseClass::Success => SendOutcome::Sent,
            ResponseClass::Throttled => SendOutcome::Throttled,
            ResponseClass::Unavailable => SendOutcome::Unavailable,
            ResponseClass::Rejected => SendOutcome::Rejected,
            ResponseClass::Transient => SendOutcome::Transient,
        }
    }

    /// Whether the step removed the head record from the store.
    pub fn removed_record(&self) -> bool {
        matches!(
            self,
            SendOutcome::Sent
                | SendOutcome::Throttled
                | SendOutcome::Rejected
                | SendOutcome::Quarantined
        )
    }
}

impl std::fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SendOutcome::Idle => "idle",
            SendOutcome::Sent => "sent",
            SendOutcome::Throttled => "throttled",
            SendOutcome::Unavailable => "unavailable",
            SendOutcome::Rejected => "rejected",
            SendOutcome::Transient => "transient",
            SendOutcome::Quarantined => "quarantined",
            SendOutcome::StoreError => "store_error",
        };
        f.write_str(s)
    }
}

/// Result of [`SenderLoop::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub outcome: SendOutcome,
    /// How long the loop waits before the next step.
    pub interval: Duration,
    pub status: Option<u16>,
    pub key: Option<String>,
}

/// Sender counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    pub attempts: u64,
    pub sent: u64,
    pub throttled: u64,
    pub rejected: u64,
    pub retried: u64,
    pub quarantined: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    sent: AtomicU64,
    throttled: AtomicU64,
    rejected: AtomicU64,
    retried: AtomicU64,
    quarantined: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn bump(&self, outcome: SendOutcome) {
        let counter = match outcome {
            SendOutcome::Idle => return,
            SendOutcome::Sent => &self.sent,
            SendOutcome::Throttled => &self.throttled,
            SendOutcome::Rejected => &self.rejected,
            SendOutcome::Unavailable | SendOutcome::Transient => &self.retried,
            SendOutcome::Quarantined => &self.quarantined,
            SendOutcome::StoreError => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct SenderLoop {
    store: Arc<dyn TransmissionStore>,
    transport: Arc<dyn Transport>,
    signal: Arc<StoreSignal>,
    diagnostics: Arc<dyn DiagnosticSink>,
    backoff: Arc<Backoff>,
    counters: Counters,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SenderLoop {
    pub fn new(
        store: Arc<dyn TransmissionStore>,
        transport: Arc<dyn Transport>,
        signal: Arc<StoreSignal>,
        policy: BackoffPolicy,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let backoff = Arc::new(Backoff::new(policy, Arc::new(SystemClock::new())));
        Self::with_backoff(store, transport, signal, backoff, diagnostics)
    }

    /// Sender loop sharing `backoff` with the transmitter.
    pub fn with_backoff(
        store: Arc<dyn TransmissionStore>,
        transport: Arc<dyn Transport>,
        signal: Arc<StoreSignal>,
        backoff: Arc<Backoff>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            store,
            transport,
            signal,
            diagnostics,
            backoff,
            counters: Counters::default(),
            worker: Mutex::new(None),
        }
    }

    pub fn backoff(&self) -> &Arc<Backoff> {
        &self.backoff
    }

    pub fn current_interval(&self) -> Duration {
        self.backoff.interval()
    }

    pub fn stats(&self) -> SenderStats {
        let c = &self.counters;
        SenderStats {
            attempts: c.attempts.load(Ordering::Relaxed),
            sent: c.sent.load(Ordering::Relaxed),
            throttled: c.throttled.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            quarantined: c.quarantined.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
        }
    }

    /// One peek, send and apply cycle.
    pub fn step(&self) -> Step {
        let step = self.try_step();
        self.counters.bump(step.outcome);
        step
    }

    fn try_step(&self) -> Step {
        let stored = match self.store.peek() {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                let interval = self.backoff.policy().base;
                return self.step_result(SendOutcome::Idle, interval, None, None);
            }
            Err(StorageError::Corrupt { key, source }) => {
                if let Err(e) = self.store.quarantine(&key) {
                    warn!(key = %key, error = %e, "failed to quarantine record");
                }
                self.diagnostics.emit(
                    DiagnosticEvent::warn(
                        event_names::RECORD_QUARANTINED,
                        Component::Sender,
                        format!("stored record {} is unreadable: {}", key, source),
                    )
                    .with_detail("key", &key),
                );
                let interval = self.current_interval();
                return self.step_result(SendOutcome::Quarantined, interval, None, Some(key));
            }
            Err(e) => {
                self.sender_error(&e.to_string(), e.code());
                let interval = self.current_interval();
                return self.step_result(SendOutcome::StoreError, interval, None, None);
            }
        };

        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        let result = self.transport.send(&stored.transmission);
        let class = ResponseClass::of(&result);
        let (status, retry_after) = match &result {
            Ok(response) => (Some(response.status), response.retry_after),
            Err(e) => {
                debug!(key = %stored.key, error = %e, "send attempt failed");
                (None, None)
            }
        };

        if !class.keeps_transmission() {
            if let Err(e) = self.store.delete(&stored.key) {
                self.sender_error(&format!("failed to delete {}: {}", stored.key, e), e.code());
            }
        }
        if class == ResponseClass::Rejected {
            self.diagnostics.emit(
                DiagnosticEvent::warn(
                    event_names::TRANSMISSION_DROPPED,
                    Component::Sender,
                    format!("endpoint rejected stored transmission {}", stored.key),
                )
                .with_detail("status", status),
            );
        }

        let interval = self.backoff.record(class, retry_after);
        let outcome = SendOutcome::from_class(class);
        debug!(
            key = %stored.key,
            outcome = %outcome,
            status = ?status,
            interval_secs = interval.as_secs_f64(),
            "sender step"
        );
        self.step_result(outcome, interval, status, Some(stored.key))
    }

    fn step_result(
        &self,
        outcome: SendOutcome,
        interval: Duration,
        status: Option<u16>,
        key: Option<String>,
    ) -> Step {
        Step {
            outcome,
            interval,
            status,
            key,
        }
    }

    fn sender_error(&self, message: &str, code: u32) {
        warn!(error = %message, "sender error");
        self.diagnostics.emit(
            DiagnosticEvent::warn(event_names::SENDER_ERROR, Component::Sender, message)
                .with_detail("error_code", code),
        );
    }

    /// Step repeatedly while each step removes a record, up to `max_steps`.
    pub fn drain(&self, max_steps: usize) -> Vec<Step> {
        let mut steps = Vec::new();
        while steps.len() < max_steps {
            let step = self.step();
            let more = step.outcome.removed_record();
            steps.push(step);
            if !more {
                break;
            }
        }
        steps
    }

    /// Run steps until stopped, waiting between them per the policy. An open
    /// backoff hold is waited out first, even when the store signal fires.
    pub fn run(&self) {
        info!("sender loop started");
        while !self.signal.is_stopped() {
            if let Some(remaining) = self.backoff.pending() {
                debug!(remaining_secs = remaining.as_secs_f64(), "holding for backoff");
                if self.signal.wait_for_stop(remaining) == Wake::Stopped {
                    break;
                }
                continue;
            }
            let step = self.step();
            let wake = match step.outcome {
                SendOutcome::Sent | SendOutcome::Quarantined => continue,
                SendOutcome::Idle => self.signal.wait_for_store(step.interval),
                _ => self.signal.wait_for_stop(step.interval),
            };
            if wake == Wake::Stopped {
                break;
            }
        }
        info!("sender loop stopped");
    }

    /// Start the loop on a background thread.
    pub fn start(self: &Arc<Self>) -> std::io::Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return Ok(());
        }
        let sender = Arc::clone(self);
        *worker = Some(
            thread::Builder::new()
                .name("tp-sender".to_string())
                .spawn(move || sender.run())?,
        );
        Ok(())
    }

    /// Signal stop and wait for the loop to exit. An in-flight send is not
    /// interrupted.
    pub fn stop(&self) {
        self.signal.stop();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
