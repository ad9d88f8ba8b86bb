//! In-memory telemetry buffer with size- and time-based flushing.
//!
//! Producers append under a mutex. Reaching `capacity` swaps the current
//! generation out inside the producer's critical section and hands it to a
//! single flush worker thread, which also owns the flush timer. The producer
//! never serializes or performs I/O.
//!
//! Pending items are those buffered plus those in swapped-out batches the
//! worker has not yet handed to the sink. Once pending reaches
//! `backlog_size`, new arrivals are dropped and one `backlog_full`
//! diagnostic is emitted per overload episode.

use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace};

use tp_common::{Error, Result, TelemetryItem};
use tp_config::{BufferSettings, MAX_INTERVAL_SECS, MIN_BACKLOG_SIZE};

use crate::diagnostics::{event_names, Component, DiagnosticEvent, DiagnosticSink};
use crate::processor::TelemetryProcessor;

/// Receives batches swapped out of the buffer.
pub trait BatchSink: Send + Sync {
    fn flush_batch(&self, batch: Vec<TelemetryItem>);
}

/// Buffer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    /// Items accepted by `process`.
    pub processed: u64,
    /// Items dropped because the backlog was full.
    pub dropped: u64,
    /// Items handed to the sink.
    pub flushed_items: u64,
    /// Non-empty batches handed to the sink.
    pub flush_count: u64,
    /// Items currently buffered in the open generation.
    pub buffered: usize,
}

enum Command {
    Batch(Vec<TelemetryItem>),
    TimerArmed,
    Flush(Vec<TelemetryItem>, mpsc::Sender<()>),
}

struct State {
    items: Vec<TelemetryItem>,
    capacity: usize,
    backlog_size: usize,
    max_delay: Duration,
    deadline: Option<Instant>,
    drop_reported: bool,
    closed: bool,
}

impl State {
    /// Swap out the current generation. Caller holds the buffer lock.
    fn swap(&mut self, in_flight: &AtomicUsize) -> Vec<TelemetryItem> {
        let batch = mem::replace(&mut self.items, Vec::with_capacity(self.capacity));
        self.deadline = None;
        self.drop_reported = false;
        in_flight.fetch_add(batch.len(), Ordering::SeqCst);
        batch
    }
}

struct Shared {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    sink: Arc<dyn BatchSink>,
    diagnostics: Arc<dyn DiagnosticSink>,
    processed: AtomicU64,
    dropped: AtomicU64,
    flushed_items: AtomicU64,
    flush_count: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn hand_off(&self, batch: Vec<TelemetryItem>) {
        if batch.is_empty() {
            return;
        }
        let n = batch.len();
        self.sink.flush_batch(batch);
        self.in_flight.fetch_sub(n, Ordering::SeqCst);
        self.flushed_items.fetch_add(n as u64, Ordering::Relaxed);
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        debug!(items = n, "flushed batch");
    }
}

/// Bounded in-memory buffer in front of a [`BatchSink`].
pub struct TelemetryBuffer {
    shared: Arc<Shared>,
    commands: Mutex<Option<mpsc::Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryBuffer {
    /// Create a buffer and start its flush worker.
    pub fn new(
        settings: &BufferSettings,
        sink: Arc<dyn BatchSink>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        validate_sizes(settings.capacity, settings.backlog_size)?;
        let max_delay = settings.max_transmission_delay()?;
        validate_delay(max_delay)?;

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                items: Vec::with_capacity(settings.capacity),
                capacity: settings.capacity,
                backlog_size: settings.backlog_size,
                max_delay,
                deadline: None,
                drop_reported: false,
                closed: false,
            }),
            in_flight: AtomicUsize::new(0),
            sink,
            diagnostics,
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            flushed_items: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
        });

        let (tx, rx) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("tp-buffer-flush".to_string())
            .spawn(move || flush_worker(worker_shared, rx))?;

        Ok(Self {
            shared,
            commands: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a command for the worker; gives it back if the worker is gone.
    fn submit(&self, command: Command) -> Option<Command> {
        let commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        match commands.as_ref() {
            Some(tx) => tx.send(command).err().map(|e| e.0),
            None => Some(command),
        }
    }

    /// Append an item, dropping it if the backlog is full.
    pub fn process(&self, item: TelemetryItem) -> Result<()> {
        item.validate()?;

        let mut armed = false;
        let mut full_batch = None;
        let mut report_drop = None;
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(Error::ShutDown);
            }

            let pending = state.items.len() + self.shared.in_flight.load(Ordering::SeqCst);
            if pending >= state.backlog_size {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                if !state.drop_reported {
                    state.drop_reported = true;
                    report_drop = Some(state.backlog_size);
                }
            } else {
                if state.items.is_empty() {
                    state.deadline = Some(Instant::now() + state.max_delay);
                    armed = true;
                }
                state.items.push(item);
                self.shared.processed.fetch_add(1, Ordering::Relaxed);

                if state.items.len() >= state.capacity {
                    full_batch = Some(state.swap(&self.shared.in_flight));
                }
            }
        }

        if let Some(backlog_size) = report_drop {
            self.shared.diagnostics.emit(
                DiagnosticEvent::warn(
                    event_names::BACKLOG_FULL,
                    Component::Buffer,
                    "telemetry backlog is full; dropping new items until the next flush",
                )
                .with_detail("backlog_size", backlog_size),
            );
        }

        if let Some(batch) = full_batch {
            trace!(items = batch.len(), "capacity reached");
            self.dispatch(batch);
        } else if armed {
            self.submit(Command::TimerArmed);
        }
        Ok(())
    }

    fn dispatch(&self, batch: Vec<TelemetryItem>) {
        if let Some(Command::Batch(batch)) = self.submit(Command::Batch(batch)) {
            // Worker gone: hand off inline.
            self.shared.hand_off(batch);
        }
    }

    /// Swap the current generation and queue it for hand-off without waiting.
    pub fn flush_async(&self) {
        let batch = self.shared.lock().swap(&self.shared.in_flight);
        if !batch.is_empty() {
            self.dispatch(batch);
        }
    }

    /// Swap the current generation and wait until every batch queued before
    /// this call has been handed to the sink.
    pub fn flush(&self) -> Result<()> {
        let batch = self.shared.lock().swap(&self.shared.in_flight);
        let (ack_tx, ack_rx) = mpsc::channel();

        match self.submit(Command::Flush(batch, ack_tx)) {
            None => ack_rx.recv().map_err(|_| Error::ShutDown),
            Some(returned) => {
                if let Command::Flush(batch, _) = returned {
                    self.shared.hand_off(batch);
                }
                Ok(())
            }
        }
    }

    /// Close the buffer, hand off the last generation, then stop and join
    /// the flush worker. Idempotent.
    ///
    /// Closing and the final swap share one critical section, so every item
    /// accepted before the close reaches the sink.
    pub fn shutdown(&self) {
        let batch = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.swap(&self.shared.in_flight)
        };
        if !batch.is_empty() {
            self.dispatch(batch);
        }

        // The worker drains every queued batch before it sees the disconnect.
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = worker.join();
        }
        debug!("buffer shut down");
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity
    }

    pub fn backlog_size(&self) -> usize {
        self.shared.lock().backlog_size
    }

    pub fn max_transmission_delay(&self) -> Duration {
        self.shared.lock().max_delay
    }

    /// Set the flush size. Must satisfy `1 <= capacity <= backlog_size`.
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        let mut state = self.shared.lock();
        validate_sizes(capacity, state.backlog_size)?;
        state.capacity = capacity;
        Ok(())
    }

    /// Set the backlog bound. Must satisfy `backlog_size >= max(1001, capacity)`.
    pub fn set_backlog_size(&self, backlog_size: usize) -> Result<()> {
        let mut state = self.shared.lock();
        validate_sizes(state.capacity, backlog_size)?;
        state.backlog_size = backlog_size;
        Ok(())
    }

    /// Set the longest time an item waits before a timed flush.
    ///
    /// Applies from the next generation.
    pub fn set_max_transmission_delay(&self, delay: Duration) -> Result<()> {
        validate_delay(delay)?;
        self.shared.lock().max_delay = delay;
        Ok(())
    }

    /// Items currently buffered in the open generation.
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            processed: self.shared.processed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            flushed_items: self.shared.flushed_items.load(Ordering::Relaxed),
            flush_count: self.shared.flush_count.load(Ordering::Relaxed),
            buffered: self.len(),
        }
    }
}

impl TelemetryProcessor for TelemetryBuffer {
    fn process(&self, item: TelemetryItem) -> Result<()> {
        TelemetryBuffer::process(self, item)
    }
}

impl Drop for TelemetryBuffer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn validate_sizes(capacity: usize, backlog_size: usize) -> Result<()> {
    if capacity < 1 {
        return Err(Error::OutOfRange {
            field: "capacity",
            value: capacity.to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    if backlog_size < MIN_BACKLOG_SIZE {
        return Err(Error::OutOfRange {
            field: "backlog_size",
            value: backlog_size.to_string(),
            message: format!("must be at least {}", MIN_BACKLOG_SIZE),
        });
    }
    if capacity > backlog_size {
        return Err(Error::InconsistentConfig(format!(
            "capacity ({}) must not exceed backlog_size ({})",
            capacity, backlog_size
        )));
    }
    Ok(())
}

fn validate_delay(delay: Duration) -> Result<()> {
    if delay.is_zero() || delay.as_secs_f64() > MAX_INTERVAL_SECS {
        return Err(Error::OutOfRange {
            field: "max_transmission_delay",
            value: format!("{:?}", delay),
            message: format!("must be positive and at most {}s", MAX_INTERVAL_SECS),
        });
    }
    Ok(())
}

fn flush_worker(shared: Arc<Shared>, rx: mpsc::Receiver<Command>) {
    loop {
        let deadline = shared.lock().deadline;
        let received = match deadline {
            Some(deadline) => {
                rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Command::Batch(batch)) => shared.hand_off(batch),
            Ok(Command::TimerArmed) => {}
            Ok(Command::Flush(batch, ack)) => {
                shared.hand_off(batch);
                let _ = ack.send(());
            }
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let batch = {
                    let mut state = shared.lock();
                    match state.deadline {
                        Some(d) if Instant::now() >= d => Some(state.swap(&shared.in_flight)),
                        _ => None,
                    }
                };
                if let Some(batch) = batch {
                    trace!(items = batch.len(), "transmission delay elapsed");
                    shared.hand_off(batch);
                }
            }
        }
    }
    debug!("flush worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::NullSink;

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<usize>>,
    }

    impl BatchSink for Recorder {
        fn flush_batch(&self, batch: Vec<TelemetryItem>) {
            self.batches.lock().unwrap().push(batch.len());
        }
    }

    fn settings(capacity: usize, delay_secs: f64) -> BufferSettings {
        BufferSettings {
            capacity,
            backlog_size: 2000,
            max_transmission_delay_secs: delay_secs,
        }
    }

    #[test]
    fn test_rejects_invalid_item() {
        let recorder = Arc::new(Recorder::default());
        let buffer =
            TelemetryBuffer::new(&settings(10, 30.0), recorder, Arc::new(NullSink)).unwrap();
        let err = buffer.process(TelemetryItem::event("")).unwrap_err();
        assert_eq!(err.code(), 20);
        assert_eq!(buffer.stats().processed, 0);
    }

    #[test]
    fn test_flush_hands_off_everything() {
        let recorder = Arc::new(Recorder::default());
        let buffer = TelemetryBuffer::new(&settings(10, 30.0), recorder.clone(), Arc::new(NullSink))
            .unwrap();
        for i in 0..3 {
            buffer.process(TelemetryItem::event(format!("e{i}"))).unwrap();
        }
        buffer.flush().unwrap();
        assert_eq!(*recorder.batches.lock().unwrap(), vec![3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_flush_does_not_call_sink() {
        let recorder = Arc::new(Recorder::default());
        let buffer = TelemetryBuffer::new(&settings(10, 30.0), recorder.clone(), Arc::new(NullSink))
            .unwrap();
        buffer.flush().unwrap();
        assert!(recorder.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_setter_validation() {
        let recorder = Arc::new(Recorder::default());
        let buffer =
            TelemetryBuffer::new(&settings(10, 30.0), recorder, Arc::new(NullSink)).unwrap();

        assert_eq!(buffer.set_capacity(0).unwrap_err().code(), 11);
        assert_eq!(buffer.set_capacity(5000).unwrap_err().code(), 12);
        assert_eq!(buffer.set_backlog_size(1000).unwrap_err().code(), 11);
        assert_eq!(buffer.capacity(), 10);
        assert_eq!(buffer.backlog_size(), 2000);

        buffer.set_backlog_size(1001).unwrap();
        buffer.set_capacity(1001).unwrap();
        assert_eq!(buffer.capacity(), 1001);
        assert_eq!(
            buffer.set_max_transmission_delay(Duration::ZERO).unwrap_err().code(),
            11
        );
    }

    #[test]
    fn test_process_after_shutdown() {
        let recorder = Arc::new(Recorder::default());
        let buffer = TelemetryBuffer::new(&settings(10, 30.0), recorder.clone(), Arc::new(NullSink))
            .unwrap();
        buffer.process(TelemetryItem::event("before")).unwrap();
        buffer.shutdown();
        buffer.shutdown();
        assert!(matches!(
            buffer.process(TelemetryItem::event("after")),
            Err(Error::ShutDown)
        ));
        assert_eq!(*recorder.batches.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_drop_flushes() {
        let recorder = Arc::new(Recorder::default());
        {
            let buffer =
                TelemetryBuffer::new(&settings(10, 30.0), recorder.clone(), Arc::new(NullSink))
                    .unwrap();
            buffer.process(TelemetryItem::event("pending")).unwrap();
        }
        assert_eq!(*recorder.batches.lock().unwrap(), vec![1]);
    }
}
