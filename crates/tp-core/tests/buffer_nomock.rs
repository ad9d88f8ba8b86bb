//! No-mock tests for the telemetry buffer.
//!
//! Validates:
//! - A capacity flush hands off exactly one full batch
//! - The backlog bound drops new arrivals with one diagnostic per episode
//! - Every processed item is either handed to the sink or counted as dropped
//! - Timer flushes fire without an explicit flush
//! - Items accepted while shutdown is in progress still reach the sink

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tp_common::TelemetryItem;
use tp_config::BufferSettings;
use tp_core::buffer::{BatchSink, TelemetryBuffer};
use tp_core::diagnostics::{event_names, DiagnosticEvent, EventBus, NullSink};

// ============================================================================
// Helpers
// ============================================================================

/// Sink that records batch sizes and can be held closed.
#[derive(Default)]
struct GatedSink {
    open: Mutex<bool>,
    cond: Condvar,
    batches: Mutex<Vec<usize>>,
    items: AtomicUsize,
}

impl GatedSink {
    fn open() -> Arc<Self> {
        let sink = Arc::new(Self::default());
        *sink.open.lock().unwrap() = true;
        sink
    }

    fn closed() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    fn wait_for_batches(&self, n: usize) -> Vec<usize> {
        let started = Instant::now();
        while self.batches.lock().unwrap().len() < n && started.elapsed() < Duration::from_secs(5)
        {
            thread::sleep(Duration::from_millis(2));
        }
        self.batches()
    }
}

impl BatchSink for GatedSink {
    fn flush_batch(&self, batch: Vec<TelemetryItem>) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cond.wait(open).unwrap();
        }
        drop(open);
        self.items.fetch_add(batch.len(), Ordering::SeqCst);
        self.batches.lock().unwrap().push(batch.len());
    }
}

/// Sink that takes a while per batch.
#[derive(Default)]
struct SlowSink {
    items: AtomicUsize,
}

impl BatchSink for SlowSink {
    fn flush_batch(&self, batch: Vec<TelemetryItem>) {
        thread::sleep(Duration::from_millis(5));
        self.items.fetch_add(batch.len(), Ordering::SeqCst);
    }
}

fn settings(capacity: usize, backlog_size: usize, delay_secs: f64) -> BufferSettings {
    BufferSettings {
        capacity,
        backlog_size,
        max_transmission_delay_secs: delay_secs,
    }
}

fn count(events: &Receiver<DiagnosticEvent>, name: &str) -> usize {
    events.try_iter().filter(|e| e.event == name).count()
}

// ============================================================================
// Flush triggers
// ============================================================================

#[test]
fn test_burst_of_501_flushes_once() {
    let sink = GatedSink::open();
    let buffer =
        TelemetryBuffer::new(&settings(500, 1_000_000, 30.0), sink.clone(), Arc::new(NullSink))
            .unwrap();

    for i in 0..501 {
        buffer.process(TelemetryItem::event(format!("e{i}"))).unwrap();
    }

    assert_eq!(sink.wait_for_batches(1), vec![500]);
    // The 501st item opened a new generation.
    assert_eq!(buffer.len(), 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(sink.batches(), vec![500]);

    buffer.flush().unwrap();
    assert_eq!(sink.batches(), vec![500, 1]);
}

#[test]
fn test_timer_flush() {
    let sink = GatedSink::open();
    let buffer =
        TelemetryBuffer::new(&settings(500, 1_000_000, 0.05), sink.clone(), Arc::new(NullSink))
            .unwrap();

    for _ in 0..3 {
        buffer.process(TelemetryItem::event("tick")).unwrap();
    }
    assert_eq!(sink.wait_for_batches(1), vec![3]);
    assert!(buffer.is_empty());

    // The timer re-arms for the next generation.
    buffer.process(TelemetryItem::event("tock")).unwrap();
    assert_eq!(sink.wait_for_batches(2), vec![3, 1]);
}

#[test]
fn test_flush_waits_for_hand_off() {
    let sink = GatedSink::open();
    let buffer =
        TelemetryBuffer::new(&settings(10, 1_001, 30.0), sink.clone(), Arc::new(NullSink))
            .unwrap();
    for _ in 0..25 {
        buffer.process(TelemetryItem::event("e")).unwrap();
    }
    buffer.flush().unwrap();
    assert_eq!(sink.items.load(Ordering::SeqCst), 25);
    assert_eq!(buffer.stats().flushed_items, 25);
}

// ============================================================================
// Backlog bound
// ============================================================================

#[test]
fn test_backlog_full_drops_with_single_diagnostic() {
    let sink = GatedSink::closed();
    let bus = Arc::new(EventBus::new());
    let events = bus.subscribe();
    let buffer = TelemetryBuffer::new(&settings(500, 1_001, 30.0), sink.clone(), bus).unwrap();

    for i in 0..1_001 {
        buffer.process(TelemetryItem::event(format!("e{i}"))).unwrap();
    }
    assert_eq!(buffer.stats().dropped, 0);

    // Item 1002 and beyond are dropped; the diagnostic fires once.
    buffer.process(TelemetryItem::event("e1001")).unwrap();
    buffer.process(TelemetryItem::event("e1002")).unwrap();
    assert_eq!(buffer.stats().dropped, 2);
    assert_eq!(count(&events, event_names::BACKLOG_FULL), 1);

    sink.release();
    buffer.flush().unwrap();

    // A flush resets the episode; the next overload reports again.
    for i in 0..1_001 {
        buffer.process(TelemetryItem::event(format!("f{i}"))).unwrap();
    }
    assert_eq!(count(&events, event_names::BACKLOG_FULL), 0);
    let stats = buffer.stats();
    assert_eq!(stats.processed, 2_002);
    assert_eq!(stats.dropped, 2);
}

#[test]
fn test_every_item_is_flushed_or_dropped() {
    let sink = GatedSink::open();
    let buffer = Arc::new(
        TelemetryBuffer::new(&settings(100, 1_001, 30.0), sink.clone(), Arc::new(NullSink))
            .unwrap(),
    );

    let producers: Vec<_> = (0..4)
        .map(|t| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..2_500 {
                    buffer
                        .process(TelemetryItem::event(format!("t{t}-{i}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    buffer.flush().unwrap();

    let stats = buffer.stats();
    assert_eq!(stats.flushed_items + stats.dropped, 10_000);
    assert_eq!(sink.items.load(Ordering::SeqCst) as u64, stats.flushed_items);
    assert_eq!(stats.buffered, 0);
}

#[test]
fn test_shutdown_with_concurrent_producer_loses_nothing() {
    for round in 0..20 {
        let sink = Arc::new(SlowSink::default());
        let buffer = Arc::new(
            TelemetryBuffer::new(&settings(50, 1_001, 30.0), sink.clone(), Arc::new(NullSink))
                .unwrap(),
        );

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut accepted = 0u64;
                while buffer
                    .process(TelemetryItem::event(format!("r{round}-{accepted}")))
                    .is_ok()
                {
                    accepted += 1;
                }
                accepted
            })
        };

        thread::sleep(Duration::from_millis(10));
        buffer.shutdown();
        let accepted = producer.join().unwrap();

        let stats = buffer.stats();
        assert_eq!(stats.processed + stats.dropped, accepted, "round {round}");
        assert_eq!(
            sink.items.load(Ordering::SeqCst) as u64 + stats.dropped,
            accepted,
            "round {round}: accepted items missing from the sink"
        );
        assert_eq!(stats.buffered, 0);
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_setter_validation() {
    let buffer = TelemetryBuffer::new(
        &settings(500, 1_000_000, 30.0),
        GatedSink::open(),
        Arc::new(NullSink),
    )
    .unwrap();

    assert_eq!(buffer.set_capacity(0).unwrap_err().code(), 11);
    assert_eq!(buffer.set_backlog_size(1_000).unwrap_err().code(), 11);
    assert_eq!(buffer.set_capacity(2_000_000).unwrap_err().code(), 12);
    assert!(buffer.set_max_transmission_delay(Duration::ZERO).is_err());

    buffer.set_backlog_size(1_001).unwrap();
    assert_eq!(buffer.set_capacity(1_002).unwrap_err().code(), 12);
    buffer.set_capacity(1_001).unwrap();
    assert_eq!(buffer.capacity(), 1_001);
}

#[test]
fn test_invalid_construction() {
    let err = TelemetryBuffer::new(
        &settings(600, 500, 30.0),
        GatedSink::open(),
        Arc::new(NullSink),
    )
    .err()
    .unwrap();
    assert_eq!(err.code(), 11);
}

#[test]
fn test_process_after_shutdown() {
    let sink = GatedSink::open();
    let buffer =
        TelemetryBuffer::new(&settings(500, 1_001, 30.0), sink.clone(), Arc::new(NullSink))
            .unwrap();
    buffer.process(TelemetryItem::event("last")).unwrap();
    buffer.shutdown();
    assert_eq!(sink.batches(), vec![1]);
    assert_eq!(
        buffer.process(TelemetryItem::event("late")).unwrap_err().code(),
        30
    );
}
