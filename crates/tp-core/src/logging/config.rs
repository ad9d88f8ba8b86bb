//! Logging configuration.
//!
//! Resolution order, last wins:
//! 1. Defaults (human format, info level, timestamps on)
//! 2. `RUST_LOG` (only the most verbose level it names), then `TP_LOG`
//! 3. `TP_LOG_FORMAT`, `TP_LOG_TIMESTAMPS`
//! 4. `--log-level`, `--log-format`

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

pub const ENV_LOG: &str = "TP_LOG";
pub const ENV_LOG_FORMAT: &str = "TP_LOG_FORMAT";
pub const ENV_LOG_TIMESTAMPS: &str = "TP_LOG_TIMESTAMPS";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Console lines for interactive use.
    #[default]
    #[value(alias = "console", alias = "pretty")]
    Human,
    /// One JSON object per event.
    #[value(alias = "json")]
    Jsonl,
}

/// Minimum level emitted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    #[value(alias = "warning")]
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            v if v.eq_ignore_ascii_case("quiet") || v.eq_ignore_ascii_case("none") => {
                Some(LogLevel::Off)
            }
            v => <LogLevel as ValueEnum>::from_str(v, true).ok(),
        }
    }

    /// Most verbose level named anywhere in an `EnvFilter` directive string.
    fn most_verbose_in(directives: &str) -> Option<Self> {
        directives
            .split(',')
            .filter_map(|d| LogLevel::parse(d.rsplit('=').next().unwrap_or(d)))
            .max()
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Timestamps on human output.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Info,
            timestamps: true,
        }
    }
}

impl LogConfig {
    /// Resolve from the process environment and CLI flags.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), cli_level, cli_format)
    }

    /// Resolve from an arbitrary environment lookup and CLI flags.
    pub fn from_lookup<F>(
        lookup: F,
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_level = lookup(ENV_LOG)
            .and_then(|v| LogLevel::parse(&v))
            .or_else(|| lookup("RUST_LOG").and_then(|v| LogLevel::most_verbose_in(&v)));
        let env_format = lookup(ENV_LOG_FORMAT)
            .and_then(|v| <LogFormat as ValueEnum>::from_str(v.trim(), true).ok());
        let env_timestamps = lookup(ENV_LOG_TIMESTAMPS).map(|v| {
            !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
        });

        let defaults = LogConfig::default();
        LogConfig {
            level: cli_level.or(env_level).unwrap_or(defaults.level),
            format: cli_format.or(env_format).unwrap_or(defaults.format),
            timestamps: env_timestamps.unwrap_or(defaults.timestamps),
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }
}
