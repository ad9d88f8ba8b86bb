//! Telemetry Pipeline Core - command line front end
//!
//! Subcommands:
//! - `send`: push JSON-lines telemetry through the configured pipeline
//! - `drain`: retry transmissions held in durable storage
//! - `storage status`: inspect durable storage
//! - `config show` / `config check`: inspect and validate configuration
//!
//! Command payloads go to stdout as JSON; logs and errors go to stderr.

use clap::{Args, Parser, Subcommand};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tp_common::error::format_error_human;
use tp_common::{Error, StructuredError, TelemetryItem};
use tp_config::{load_config, ConfigLocation, ConfigSnapshot, PipelineConfig, ValidationError};
use tp_core::client::open_store;
use tp_core::diagnostics::{default_sink, DiagnosticSink, FanoutSink, JsonlWriter};
use tp_core::exit_codes::ExitCode;
use tp_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use tp_core::sender::{BackoffPolicy, SenderLoop};
use tp_core::transport::Transport;
use tp_core::TelemetryClient;
use tp_storage::{default_storage_dir, StoreSignal};

/// Telemetry Pipeline Core - buffer, sample and reliably transmit telemetry
#[derive(Parser)]
#[command(name = "tp-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to the pipeline configuration file (TOML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Append pipeline diagnostic events to this file as JSON lines
    #[arg(long, global = true)]
    diagnostics_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Track JSON-lines telemetry items through the pipeline
    Send(SendArgs),

    /// Retry transmissions held in durable storage
    Drain(DrainArgs),

    /// Durable storage management
    Storage(StorageArgs),

    /// Configuration management
    Config(ConfigArgs),
}

// ============================================================================
// Command argument structs
// ============================================================================

#[derive(Args, Debug)]
struct SendArgs {
    /// Read items from this file instead of stdin
    #[arg(long)]
    input: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DrainArgs {
    /// Perform a single send attempt
    #[arg(long)]
    once: bool,

    /// Upper bound on send attempts
    #[arg(long, default_value = "10000")]
    max_steps: usize,
}

#[derive(Args, Debug)]
struct StorageArgs {
    #[command(subcommand)]
    command: StorageCommands,
}

#[derive(Subcommand, Debug)]
enum StorageCommands {
    /// Show record count and size of the durable store
    Status,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Validate the configuration and exit
    Check,
}

fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env(cli.global.log_level, cli.global.log_format);
    init_logging(&log_config);

    let exit_code = match &cli.command {
        Commands::Send(args) => run_send(&cli.global, args),
        Commands::Drain(args) => run_drain(&cli.global, args),
        Commands::Storage(args) => match args.command {
            StorageCommands::Status => run_storage_status(&cli.global),
        },
        Commands::Config(args) => match args.command {
            ConfigCommands::Show => run_config_show(&cli.global),
            ConfigCommands::Check => run_config_check(&cli.global),
        },
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Shared helpers
// ============================================================================

fn load(global: &GlobalOpts) -> Result<(PipelineConfig, ConfigLocation), ExitCode> {
    if let Some(path) = &global.config {
        if !path.exists() {
            let err = ValidationError::IoError(format!("{} does not exist", path.display()));
            return Err(output_config_error(&err));
        }
    }
    load_config(global.config.as_deref()).map_err(|e| output_config_error(&e))
}

/// Config for commands that touch durable storage: falls back to the
/// per-user data directory when none is configured.
fn load_with_storage(global: &GlobalOpts) -> Result<PipelineConfig, ExitCode> {
    let (mut config, _) = load(global)?;
    if config.transmission.storage_dir.is_none() {
        config.transmission.storage_dir = Some(default_storage_dir());
    }
    Ok(config)
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to encode output: {}", e),
    }
}

fn output_error(error: &Error) -> ExitCode {
    let structured = StructuredError::from(error);
    eprintln!("{}", format_error_human(error, false));
    eprintln!("{}", structured.to_json());
    ExitCode::for_category(error.category())
}

fn output_config_error(error: &ValidationError) -> ExitCode {
    let response = serde_json::json!({
        "status": "error",
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "error": {
            "code": error.code(),
            "message": error.to_string(),
        }
    });
    match serde_json::to_string_pretty(&response) {
        Ok(s) => eprintln!("{}", s),
        Err(_) => eprintln!("config error: {}", error),
    }
    ExitCode::UsageError
}

/// Tracing sink, plus a JSONL file when `--diagnostics-file` is given.
fn diagnostics(global: &GlobalOpts) -> Result<Arc<dyn DiagnosticSink>, Error> {
    let Some(path) = &global.diagnostics_file else {
        return Ok(default_sink());
    };
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(Arc::new(FanoutSink::new(vec![
        default_sink(),
        Arc::new(JsonlWriter::new(file)),
    ])))
}

#[cfg(feature = "http")]
fn transport() -> Result<Arc<dyn Transport>, Error> {
    Ok(Arc::new(tp_core::transport::HttpTransport::default()))
}

#[cfg(not(feature = "http"))]
fn transport() -> Result<Arc<dyn Transport>, Error> {
    Err(Error::Config(
        "tp-core was built without the http feature".to_string(),
    ))
}

// ============================================================================
// send
// ============================================================================

fn read_items(input: Option<&Path>) -> Result<Box<dyn BufRead>, Error> {
    Ok(match input {
        Some(path) => Box::new(BufReader::new(std::fs::File::open(path)?)),
        None => Box::new(BufReader::new(std::io::stdin())),
    })
}

fn run_send(global: &GlobalOpts, args: &SendArgs) -> ExitCode {
    let config = match load_with_storage(global) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let transport = match transport() {
        Ok(t) => t,
        Err(e) => return output_error(&e),
    };
    let reader = match read_items(args.input.as_deref()) {
        Ok(r) => r,
        Err(e) => return output_error(&e),
    };
    let sink = match diagnostics(global) {
        Ok(sink) => sink,
        Err(e) => return output_error(&e),
    };

    let client = match TelemetryClient::builder(config)
        .transport(transport)
        .diagnostics(sink)
        .start_sender(false)
        .sweep_interval(None)
        .build()
    {
        Ok(client) => client,
        Err(e) => return output_error(&e),
    };

    let mut lines = 0u64;
    let mut invalid = 0u64;
    for (n, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => return output_error(&Error::Io(e)),
        };
        if line.trim().is_empty() {
            continue;
        }
        lines += 1;
        let result = serde_json::from_str::<TelemetryItem>(&line)
            .map_err(Error::from)
            .and_then(|item| client.track(item));
        if let Err(e) = result {
            invalid += 1;
            tracing::warn!(line = n + 1, error = %e, "skipping telemetry item");
        }
    }

    if let Err(e) = client.flush() {
        return output_error(&e);
    }
    client.shutdown();

    print_json(&serde_json::json!({
        "lines": lines,
        "invalid": invalid,
        "stats": client.stats(),
    }));
    ExitCode::Success
}

// ============================================================================
// drain
// ============================================================================

fn run_drain(global: &GlobalOpts, args: &DrainArgs) -> ExitCode {
    let config = match load_with_storage(global) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => return output_error(&e),
    };
    let transport = match transport() {
        Ok(t) => t,
        Err(e) => return output_error(&e),
    };

    let policy = match BackoffPolicy::from_settings(&config.transmission) {
        Ok(policy) => policy,
        Err(e) => return output_error(&e),
    };
    let sink = match diagnostics(global) {
        Ok(sink) => sink,
        Err(e) => return output_error(&e),
    };
    let sender = SenderLoop::new(
        Arc::clone(&store),
        transport,
        Arc::new(StoreSignal::new()),
        policy,
        sink,
    );
    let steps = if args.once {
        vec![sender.step()]
    } else {
        sender.drain(args.max_steps)
    };

    let steps: Vec<_> = steps
        .iter()
        .map(|step| {
            serde_json::json!({
                "outcome": step.outcome,
                "status": step.status,
                "key": step.key,
                "next_interval_secs": step.interval.as_secs_f64(),
            })
        })
        .collect();
    let remaining = match store.len() {
        Ok(n) => n,
        Err(e) => return output_error(&e.into()),
    };

    print_json(&serde_json::json!({
        "steps": steps,
        "remaining": remaining,
        "stats": sender.stats(),
    }));
    ExitCode::Success
}

// ============================================================================
// storage
// ============================================================================

fn run_storage_status(global: &GlobalOpts) -> ExitCode {
    let config = match load_with_storage(global) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => return output_error(&e),
    };
    let stats = match store.stats() {
        Ok(stats) => stats,
        Err(e) => return output_error(&e.into()),
    };

    print_json(&serde_json::json!({
        "dir": config.transmission.storage_dir.as_ref().map(|d| d.display().to_string()),
        "records": stats.records,
        "bytes": stats.bytes,
        "max_records": config.transmission.storage_max_records,
        "max_bytes": config.transmission.storage_max_bytes,
    }));
    ExitCode::Success
}

// ============================================================================
// config
// ============================================================================

fn run_config_show(global: &GlobalOpts) -> ExitCode {
    let (config, location) = match load(global) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let snapshot = ConfigSnapshot::new(&config, &location);
    print_json(&serde_json::json!({
        "snapshot": snapshot,
        "config": config,
    }));
    ExitCode::Success
}

fn run_config_check(global: &GlobalOpts) -> ExitCode {
    let (config, location) = match load(global) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let snapshot = ConfigSnapshot::new(&config, &location);
    print_json(&serde_json::json!({
        "status": "valid",
        "source": location.source.to_string(),
        "path": location.path.as_ref().map(|p| p.display().to_string()),
        "config_id": snapshot.short_id(),
        "config_hash": snapshot.config_hash,
    }));
    ExitCode::Success
}
