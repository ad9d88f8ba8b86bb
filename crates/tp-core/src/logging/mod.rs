//! Structured logging for the pipeline and the tp-core binary.
//!
//! Human console lines or JSON lines, always on stderr: stdout carries
//! command payloads only. Library code logs through `tracing` and never
//! installs a subscriber itself.

pub mod config;

pub use config::{LogConfig, LogFormat, LogLevel};

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Crates whose events the default filter admits.
const LOG_TARGETS: [&str; 4] = ["tp_core", "tp_storage", "tp_config", "tp_common"];

/// Filter directives admitting the pipeline crates at `level`.
pub fn default_directives(level: LogLevel) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn output_layer(config: &LogConfig) -> BoxedLayer {
    match config.format {
        LogFormat::Jsonl => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());
            if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
///
/// A set `RUST_LOG` replaces the level-derived directives.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

    if tracing_subscriber::registry()
        .with(output_layer(config).with_filter(filter))
        .try_init()
        .is_err()
    {
        tracing::debug!("logging already initialized");
    }
}
