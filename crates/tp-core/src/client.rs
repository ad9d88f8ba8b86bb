//! Telemetry client: the producer-facing entry point.
//!
//! Items flow through the chain
//!
//! ```text
//! track -> live metrics -> sampling -> buffer -> transmitter -> transport
//!                                                     |
//!                                                     v (retryable failure)
//!                                           transmission store <- sender loop
//! ```
//!
//! Every component receives the [`PipelineConfig`] section it needs at
//! construction; there is no global configuration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use tp_common::{Clock, Error, Result, SeverityLevel, SystemClock, TelemetryItem};
use tp_config::PipelineConfig;
use tp_storage::{
    FileStore, FileStoreConfig, MemoryStore, StoreLimits, StoreSignal, StoreStats,
    TransmissionStore,
};

use crate::buffer::{BatchSink, BufferStats, TelemetryBuffer};
use crate::correlation::CorrelationCache;
use crate::diagnostics::{default_sink, DiagnosticSink};
use crate::live_metrics::LiveMetricsStream;
use crate::processor::TelemetryProcessor;
use crate::sampling::Sampler;
use crate::sender::{Backoff, BackoffPolicy, SenderLoop, SenderStats};
use crate::serializer::{JsonLinesSerializer, Serializer};
use crate::transmitter::{Transmitter, TransmitterStats};
use crate::transport::Transport;

/// How long an unfinished dependency call is remembered.
pub const DEFAULT_DEPENDENCY_TTL: Duration = Duration::from_secs(600);

/// How often expired dependency calls are swept.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A dependency call started with [`TelemetryClient::begin_dependency`].
#[derive(Debug, Clone)]
pub struct PendingDependency {
    pub name: String,
    pub target: Option<String>,
    pub operation_id: Option<String>,
    started: Duration,
}

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    pub tracked: u64,
    pub rejected: u64,
    pub sampling_percentage: f64,
    pub sampled_out: u64,
    pub buffer: BufferStats,
    pub transmitter: TransmitterStats,
    pub sender: SenderStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StoreStats>,
    pub pending_dependencies: usize,
}

/// Builder for [`TelemetryClient`]; collaborators default to the
/// production implementations.
pub struct TelemetryClientBuilder {
    config: PipelineConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn TransmissionStore>>,
    serializer: Option<Arc<dyn Serializer>>,
    clock: Option<Arc<dyn Clock>>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    start_sender: bool,
    dependency_ttl: Duration,
    sweep_interval: Option<Duration>,
}

impl TelemetryClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn TransmissionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Whether to run the background sender loop (default true).
    pub fn start_sender(mut self, start: bool) -> Self {
        self.start_sender = start;
        self
    }

    pub fn dependency_ttl(mut self, ttl: Duration) -> Self {
        self.dependency_ttl = ttl;
        self
    }

    /// Sweep interval for expired dependency calls; `None` disables the
    /// sweeper thread.
    pub fn sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn build(self) -> Result<TelemetryClient> {
        let config = self.config;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let diagnostics = self.diagnostics.unwrap_or_else(default_sink);
        let serializer = self
            .serializer
            .unwrap_or_else(|| Arc::new(JsonLinesSerializer::new()) as Arc<dyn Serializer>);
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let store = match self.store {
            Some(store) => store,
            None => open_store(&config)?,
        };

        let signal = Arc::new(StoreSignal::new());
        let backoff = Arc::new(Backoff::new(
            BackoffPolicy::from_settings(&config.transmission)?,
            Arc::clone(&clock),
        ));
        let transmitter = Arc::new(
            Transmitter::new(
                config.endpoint.clone(),
                serializer,
                Arc::clone(&transport),
                Arc::clone(&store),
                Arc::clone(&signal),
                Arc::clone(&diagnostics),
            )
            .with_backoff(Arc::clone(&backoff)),
        );
        let buffer = Arc::new(TelemetryBuffer::new(
            &config.buffer,
            Arc::clone(&transmitter) as Arc<dyn BatchSink>,
            Arc::clone(&diagnostics),
        )?);
        let sampler = Arc::new(Sampler::from_settings(
            &config.sampling,
            Arc::clone(&buffer) as Arc<dyn TelemetryProcessor>,
            Arc::clone(&clock),
            Arc::clone(&diagnostics),
        )?);
        let live_metrics = if config.live_metrics.enabled {
            Some(Arc::new(LiveMetricsStream::new(
                &config.live_metrics,
                &config.quota,
                Arc::clone(&sampler) as Arc<dyn TelemetryProcessor>,
                Arc::clone(&clock),
            )?))
        } else {
            None
        };
        let head: Arc<dyn TelemetryProcessor> = match &live_metrics {
            Some(stream) => Arc::clone(stream) as Arc<dyn TelemetryProcessor>,
            None => Arc::clone(&sampler) as Arc<dyn TelemetryProcessor>,
        };

        let sender = Arc::new(SenderLoop::with_backoff(
            Arc::clone(&store),
            transport,
            signal,
            backoff,
            Arc::clone(&diagnostics),
        ));
        if self.start_sender {
            sender.start()?;
        }

        let dependencies = Arc::new(CorrelationCache::new(self.dependency_ttl, Arc::clone(&clock)));
        if let Some(interval) = self.sweep_interval {
            dependencies.start_sweeper(interval)?;
        }

        info!(
            endpoint = %config.endpoint,
            sampling = %config.sampling.mode,
            capacity = config.buffer.capacity,
            "telemetry client started"
        );

        Ok(TelemetryClient {
            config,
            head,
            live_metrics,
            sampler,
            buffer,
            transmitter,
            store,
            sender,
            dependencies,
            clock,
            tracked: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        })
    }
}

#[cfg(feature = "http")]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(crate::transport::HttpTransport::default()))
}

#[cfg(not(feature = "http"))]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Err(Error::Config(
        "no transport configured and the http feature is disabled".to_string(),
    ))
}

/// Open the store named by the transmission settings: a file store when a
/// directory is configured, memory otherwise.
pub fn open_store(config: &PipelineConfig) -> Result<Arc<dyn TransmissionStore>> {
    let settings = &config.transmission;
    let limits = StoreLimits {
        max_bytes: settings.storage_max_bytes,
        max_records: settings.storage_max_records,
        max_record_age: settings.max_record_age(),
    };
    Ok(match &settings.storage_dir {
        Some(dir) => {
            let store = FileStore::open(FileStoreConfig::new(dir.clone()).with_limits(limits))?;
            debug!(dir = %dir.display(), "using file transmission store");
            Arc::new(store)
        }
        None => Arc::new(MemoryStore::new(limits)),
    })
}

pub struct TelemetryClient {
    config: PipelineConfig,
    head: Arc<dyn TelemetryProcessor>,
    live_metrics: Option<Arc<LiveMetricsStream>>,
    sampler: Arc<Sampler>,
    buffer: Arc<TelemetryBuffer>,
    transmitter: Arc<Transmitter>,
    store: Arc<dyn TransmissionStore>,
    sender: Arc<SenderLoop>,
    dependencies: Arc<CorrelationCache<PendingDependency>>,
    clock: Arc<dyn Clock>,
    tracked: AtomicU64,
    rejected: AtomicU64,
    shut_down: AtomicBool,
}

impl TelemetryClient {
    pub fn builder(config: PipelineConfig) -> TelemetryClientBuilder {
        TelemetryClientBuilder {
            config,
            transport: None,
            store: None,
            serializer: None,
            clock: None,
            diagnostics: None,
            start_sender: true,
            dependency_ttl: DEFAULT_DEPENDENCY_TTL,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }

    /// Client with production collaborators.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Hand an item to the pipeline. Fails only for an invalid item or after
    /// shutdown; delivery problems are reported through diagnostics.
    pub fn track(&self, mut item: TelemetryItem) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        if let Err(e) = item.validate() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }
        if item.instrumentation_key.is_none() {
            item.instrumentation_key = self.config.instrumentation_key.clone();
        }
        self.tracked.fetch_add(1, Ordering::Relaxed);
        self.head.process(item)
    }

    pub fn track_event(&self, name: impl Into<String>) -> Result<()> {
        self.track(TelemetryItem::event(name))
    }

    pub fn track_trace(
        &self,
        message: impl Into<String>,
        severity: Option<SeverityLevel>,
    ) -> Result<()> {
        self.track(TelemetryItem::trace(message, severity))
    }

    pub fn track_request(
        &self,
        name: impl Into<String>,
        duration_ms: f64,
        response_code: impl Into<String>,
        success: bool,
    ) -> Result<()> {
        self.track(TelemetryItem::request(name, duration_ms, response_code, success))
    }

    pub fn track_dependency(
        &self,
        name: impl Into<String>,
        target: Option<String>,
        duration_ms: f64,
        success: bool,
    ) -> Result<()> {
        self.track(TelemetryItem::dependency(name, target, duration_ms, success))
    }

    pub fn track_exception(
        &self,
        type_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<()> {
        self.track(TelemetryItem::exception(type_name, message))
    }

    pub fn track_metric(&self, name: impl Into<String>, value: f64) -> Result<()> {
        self.track(TelemetryItem::metric(name, value))
    }

    pub fn track_page_view(&self, name: impl Into<String>, url: Option<String>) -> Result<()> {
        self.track(TelemetryItem::page_view(name, url))
    }

    /// Start timing a dependency call; returns the call id for
    /// [`end_dependency`](Self::end_dependency).
    pub fn begin_dependency(
        &self,
        operation_id: Option<&str>,
        name: impl Into<String>,
        target: Option<String>,
    ) -> String {
        let call_id = tp_common::item::new_item_id();
        self.dependencies.insert(
            call_id.clone(),
            PendingDependency {
                name: name.into(),
                target,
                operation_id: operation_id.map(str::to_string),
                started: self.clock.elapsed(),
            },
        );
        call_id
    }

    /// Finish a dependency call and track it with the measured duration.
    ///
    /// Returns `Ok(false)` if the call id is unknown or already expired.
    pub fn end_dependency(
        &self,
        call_id: &str,
        success: bool,
        result_code: Option<String>,
    ) -> Result<bool> {
        let Some(pending) = self.dependencies.remove(call_id) else {
            return Ok(false);
        };
        let duration = self.clock.elapsed().saturating_sub(pending.started);
        let mut item = TelemetryItem::dependency(
            pending.name,
            pending.target,
            duration.as_secs_f64() * 1000.0,
            success,
        );
        if let tp_common::TelemetryData::Dependency(data) = &mut item.data {
            data.result_code = result_code;
        }
        if let Some(operation_id) = pending.operation_id {
            item = item.with_operation_id(operation_id);
        }
        self.track(item)?;
        Ok(true)
    }

    /// Synchronously hand everything buffered to the transmitter.
    pub fn flush(&self) -> Result<()> {
        self.buffer.flush()
    }

    /// Final flush, then stop the sender and background threads. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.buffer.shutdown();
        self.sampler.shutdown();
        self.sender.stop();
        self.dependencies.stop_sweeper();
        info!("telemetry client shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn live_metrics(&self) -> Option<&LiveMetricsStream> {
        self.live_metrics.as_deref()
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn buffer(&self) -> &TelemetryBuffer {
        &self.buffer
    }

    pub fn sender(&self) -> &SenderLoop {
        &self.sender
    }

    pub fn store(&self) -> &Arc<dyn TransmissionStore> {
        &self.store
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            tracked: self.tracked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            sampling_percentage: self.sampler.current_percentage(),
            sampled_out: self.sampler.sampled_out(),
            buffer: self.buffer.stats(),
            transmitter: self.transmitter.stats(),
            sender: self.sender.stats(),
            storage: self.store.stats().ok(),
            pending_dependencies: self.dependencies.len(),
        }
    }
}

impl Drop for TelemetryClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
