//! No-mock configuration resolution + loading tests.
//!
//! Covers:
//! - Resolution order (CLI > env path > env dir)
//! - TOML and JSON loading through `load_config`
//! - Environment overrides applied after file values
//! - Validation failures surfacing from `load_config`

use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use tempfile::TempDir;
use tp_config::pipeline::{ENV_ENDPOINT, ENV_SAMPLING_PERCENTAGE, ENV_STORAGE_DIR};
use tp_config::resolve::{ENV_CONFIG_DIR, ENV_CONFIG_PATH};
use tp_config::{load_config, resolve_config, ConfigSnapshot, ConfigSource, SamplingMode, ValidationError};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const ALL_KEYS: [&str; 5] = [
    ENV_CONFIG_PATH,
    ENV_CONFIG_DIR,
    ENV_ENDPOINT,
    ENV_SAMPLING_PERCENTAGE,
    ENV_STORAGE_DIR,
];

struct EnvGuard {
    keys: Vec<String>,
    saved: Vec<Option<String>>,
}

impl EnvGuard {
    fn new(keys: &[&str]) -> Self {
        let mut saved = Vec::with_capacity(keys.len());
        for key in keys {
            saved.push(env::var(key).ok());
            env::remove_var(key);
        }
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            saved,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (idx, key) in self.keys.iter().enumerate() {
            match self.saved.get(idx).and_then(|v| v.as_ref()) {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    f()
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, content).expect("write config");
}

// ============================================================================
// Resolution order
// ============================================================================

#[test]
fn test_cli_beats_env_path() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&ALL_KEYS);
        let tmp = TempDir::new().unwrap();
        let cli = tmp.path().join("cli.toml");
        let env_file = tmp.path().join("env.toml");
        write(&cli, "");
        write(&env_file, "");
        env::set_var(ENV_CONFIG_PATH, &env_file);

        let location = resolve_config(Some(&cli));
        assert_eq!(location.source, ConfigSource::CliArgument);
        assert_eq!(location.path.as_deref(), Some(cli.as_path()));
    });
}

#[test]
fn test_env_path_beats_env_dir() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&ALL_KEYS);
        let tmp = TempDir::new().unwrap();
        let env_file = tmp.path().join("direct.json");
        let dir = tmp.path().join("dir");
        write(&env_file, "{}");
        write(&dir.join("pipeline.toml"), "");
        env::set_var(ENV_CONFIG_PATH, &env_file);
        env::set_var(ENV_CONFIG_DIR, &dir);

        let location = resolve_config(None);
        assert_eq!(location.source, ConfigSource::Environment);
        assert_eq!(location.path.as_deref(), Some(env_file.as_path()));
    });
}

#[test]
fn test_missing_env_path_falls_back_to_dir() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&ALL_KEYS);
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("dir");
        write(&dir.join("pipeline.json"), "{}");
        env::set_var(ENV_CONFIG_PATH, tmp.path().join("nope.toml"));
        env::set_var(ENV_CONFIG_DIR, &dir);

        let location = resolve_config(None);
        assert_eq!(location.source, ConfigSource::Environment);
        assert!(location.path.unwrap().ends_with("pipeline.json"));
    });
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_load_toml_file() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&ALL_KEYS);
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pipeline.toml");
        write(
            &path,
            r#"
            endpoint = "http://collector.local/track"

            [buffer]
            capacity = 50
            backlog_size = 2000

            [sampling]
            mode = "adaptive"
            "#,
        );

        let (config, location) = load_config(Some(&path)).expect("load toml");
        assert_eq!(location.source, ConfigSource::CliArgument);
        assert_eq!(config.endpoint, "http://collector.local/track");
        assert_eq!(config.buffer.capacity, 50);
        assert_eq!(config.buffer.backlog_size, 2000);
        assert_eq!(config.sampling.mode, SamplingMode::Adaptive);
    });
}

#[test]
fn test_env_overrides_win_over_file() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&ALL_KEYS);
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pipeline.json");
        write(
            &path,
            r#"{"endpoint": "http://file/track", "sampling": {"percentage": 50.0}}"#,
        );
        let storage = tmp.path().join("spool");
        env::set_var(ENV_ENDPOINT, "http://env/track");
        env::set_var(ENV_SAMPLING_PERCENTAGE, "10");
        env::set_var(ENV_STORAGE_DIR, &storage);

        let (config, _) = load_config(Some(&path)).expect("load json");
        assert_eq!(config.endpoint, "http://env/track");
        assert!((config.sampling.percentage - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.transmission.storage_dir.as_deref(), Some(storage.as_path()));
    });
}

#[test]
fn test_invalid_values_rejected_on_load() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&ALL_KEYS);
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pipeline.toml");
        write(&path, "[buffer]\nbacklog_size = 10\n");

        let err = load_config(Some(&path)).expect_err("backlog below floor");
        assert!(matches!(err, ValidationError::InvalidValue { .. }));
    });
}

#[test]
fn test_unknown_kind_rejected_on_load() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&ALL_KEYS);
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pipeline.toml");
        write(&path, "[sampling]\nexcluded_types = \"Request;Heartbeat\"\n");

        let err = load_config(Some(&path)).expect_err("unknown kind");
        assert_eq!(err.code(), 65);
    });
}

#[test]
fn test_parse_error_code() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&ALL_KEYS);
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pipeline.toml");
        write(&path, "[buffer\ncapacity = ");

        let err = load_config(Some(&path)).expect_err("broken toml");
        assert_eq!(err.code(), 61);
    });
}

#[test]
fn test_snapshot_tracks_loaded_config() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&ALL_KEYS);
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pipeline.toml");
        write(&path, "[buffer]\ncapacity = 42\n");

        let (config, location) = load_config(Some(&path)).unwrap();
        let snapshot = ConfigSnapshot::new(&config, &location);
        assert_eq!(snapshot.summary.buffer_capacity, 42);
        assert_eq!(snapshot.source, "CLI argument");
        let defaults = ConfigSnapshot::new(
            &tp_config::PipelineConfig::default(),
            &tp_config::ConfigLocation::default(),
        );
        assert!(!snapshot.same_settings(&defaults));
    });
}
