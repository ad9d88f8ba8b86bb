//! Processor chain contract.
//!
//! Every stage between `track` and the buffer (live metrics, samplers,
//! the adaptive estimator) implements [`TelemetryProcessor`] and forwards
//! to the next stage it owns.

use std::sync::{Arc, Mutex};

use tp_common::{Result, TelemetryItem};

/// One stage of the telemetry processing chain.
pub trait TelemetryProcessor: Send + Sync {
    /// Consume an item, forwarding it downstream or dropping it.
    ///
    /// Errors only for an invalid item; drops are not errors.
    fn process(&self, item: TelemetryItem) -> Result<()>;
}

impl<P: TelemetryProcessor + ?Sized> TelemetryProcessor for Arc<P> {
    fn process(&self, item: TelemetryItem) -> Result<()> {
        (**self).process(item)
    }
}

/// Terminal processor that keeps everything it receives.
#[derive(Debug, Default)]
pub struct CollectingProcessor {
    items: Mutex<Vec<TelemetryItem>>,
}

impl CollectingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every item received so far.
    pub fn take(&self) -> Vec<TelemetryItem> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetryProcessor for CollectingProcessor {
    fn process(&self, item: TelemetryItem) -> Result<()> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(item);
        Ok(())
    }
}
