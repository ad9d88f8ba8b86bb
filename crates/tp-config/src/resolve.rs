//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths →
//! system config → defaults.

use std::path::{Path, PathBuf};

use crate::pipeline::PipelineConfig;
use crate::validate::{validate_config, ValidationResult};

/// Where the configuration was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Found in /etc/telemetry-pipeline/.
    SystemConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Discovered configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigLocation {
    /// Path to the configuration file (or None for built-in defaults).
    pub path: Option<PathBuf>,

    /// Source of the configuration (for diagnostics).
    pub source: ConfigSource,
}

/// Environment variable names.
pub const ENV_CONFIG_PATH: &str = "TELEMETRY_PIPELINE_CONFIG";
pub const ENV_CONFIG_DIR: &str = "TELEMETRY_PIPELINE_CONFIG_DIR";

/// Standard config file names, in lookup order.
const CONFIG_FILENAMES: [&str; 2] = ["pipeline.toml", "pipeline.json"];

/// Application name for XDG directories.
const APP_NAME: &str = "telemetry-pipeline";

/// Resolve the configuration file using the standard resolution order.
///
/// 1. Explicit CLI path (if provided and present)
/// 2. `TELEMETRY_PIPELINE_CONFIG` (direct path)
/// 3. `TELEMETRY_PIPELINE_CONFIG_DIR` + filename
/// 4. XDG config directory (~/.config/telemetry-pipeline/)
/// 5. System config (/etc/telemetry-pipeline/)
/// 6. Built-in defaults (None)
pub fn resolve_config(cli_path: Option<&Path>) -> ConfigLocation {
    resolve_config_with(cli_path, |key| std::env::var(key).ok(), dirs::config_dir())
}

/// Resolution with injectable environment lookup and XDG directory.
pub fn resolve_config_with<F>(
    cli_path: Option<&Path>,
    env: F,
    xdg_config: Option<PathBuf>,
) -> ConfigLocation
where
    F: Fn(&str) -> Option<String>,
{
    // 1. CLI argument
    if let Some(path) = cli_path {
        if path.exists() {
            return found(path.to_path_buf(), ConfigSource::CliArgument);
        }
    }

    // 2. Environment variable (direct path)
    if let Some(env_path) = env(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    // 3. Environment variable (config dir)
    if let Some(config_dir) = env(ENV_CONFIG_DIR) {
        if let Some(path) = first_existing(&PathBuf::from(config_dir)) {
            return found(path, ConfigSource::Environment);
        }
    }

    // 4. XDG config directory
    if let Some(xdg_config) = xdg_config {
        if let Some(path) = first_existing(&xdg_config.join(APP_NAME)) {
            return found(path, ConfigSource::XdgConfig);
        }
    }

    // 5. System config
    if let Some(path) = first_existing(&PathBuf::from("/etc").join(APP_NAME)) {
        return found(path, ConfigSource::SystemConfig);
    }

    // 6. Built-in default (None)
    ConfigLocation::default()
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

fn found(path: PathBuf, source: ConfigSource) -> ConfigLocation {
    ConfigLocation {
        path: Some(path),
        source,
    }
}

/// Resolve, load, apply environment overrides and validate.
pub fn load_config(cli_path: Option<&Path>) -> ValidationResult<(PipelineConfig, ConfigLocation)> {
    let location = resolve_config(cli_path);
    let mut config = match &location.path {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    config.apply_env_overrides()?;
    validate_config(&config)?;
    Ok((config, location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_builtin_default_when_nothing_found() {
        let tmp = TempDir::new().unwrap();
        let location = resolve_config_with(None, no_env, Some(tmp.path().to_path_buf()));
        // /etc/telemetry-pipeline does not exist on build hosts.
        if location.source != ConfigSource::SystemConfig {
            assert_eq!(location.source, ConfigSource::BuiltinDefault);
            assert!(location.path.is_none());
        }
    }

    #[test]
    fn test_cli_path_wins() {
        let tmp = TempDir::new().unwrap();
        let cli = tmp.path().join("cli.json");
        std::fs::write(&cli, "{}").unwrap();

        let env_dir = tmp.path().join("envdir");
        std::fs::create_dir_all(&env_dir).unwrap();
        std::fs::write(env_dir.join("pipeline.toml"), "").unwrap();

        let vars: HashMap<&str, String> =
            [(ENV_CONFIG_DIR, env_dir.display().to_string())].into_iter().collect();

        let location = resolve_config_with(Some(&cli), |k| vars.get(k).cloned(), None);
        assert_eq!(location.source, ConfigSource::CliArgument);
        assert_eq!(location.path.as_deref(), Some(cli.as_path()));
    }

    #[test]
    fn test_missing_cli_path_falls_through_to_env_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("pipeline.json"), "{}").unwrap();

        let vars: HashMap<&str, String> =
            [(ENV_CONFIG_DIR, tmp.path().display().to_string())].into_iter().collect();
        let missing = tmp.path().join("missing.toml");

        let location = resolve_config_with(Some(&missing), |k| vars.get(k).cloned(), None);
        assert_eq!(location.source, ConfigSource::Environment);
        assert!(location.path.unwrap().ends_with("pipeline.json"));
    }

    #[test]
    fn test_toml_preferred_over_json_in_dir() {
        let tmp = TempDir::new().unwrap();
        let xdg = tmp.path().join(APP_NAME);
        std::fs::create_dir_all(&xdg).unwrap();
        std::fs::write(xdg.join("pipeline.json"), "{}").unwrap();
        std::fs::write(xdg.join("pipeline.toml"), "").unwrap();

        let location = resolve_config_with(None, no_env, Some(tmp.path().to_path_buf()));
        assert_eq!(location.source, ConfigSource::XdgConfig);
        assert!(location.path.unwrap().ends_with("pipeline.toml"));
    }

    #[test]
    fn test_source_display() {
        assert_eq!(ConfigSource::CliArgument.to_string(), "CLI argument");
        assert_eq!(ConfigSource::BuiltinDefault.to_string(), "builtin default");
    }
}
