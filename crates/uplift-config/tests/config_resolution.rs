//! Configuration resolution and loading tests against real files.
//!
//! Covers:
//! - Resolution order (CLI > UPLIFT_CONFIG > UPLIFT_CONFIG_DIR > XDG)
//! - Loading and validating a realistic device configuration

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;
use uplift_config::resolve::{load_config, resolve_config_path, ConfigSource};
use uplift_config::{validate_config, RestartConfig, SourceStrategy, ValidationError};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const ENV_KEYS: &[&str] = &["UPLIFT_CONFIG", "UPLIFT_CONFIG_DIR", "XDG_CONFIG_HOME"];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn new(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|k| (k.to_string(), env::var(k).ok()))
            .collect();
        for key in keys {
            env::remove_var(key);
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
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
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f()
}

fn write_config(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create config parent");
    }
    fs::write(path, body).expect("write config");
}

const DEVICE_CONFIG: &str = r#"
enabled = true
updateable_dirs = ["static", "templates"]
required_files = ["VERSION", "main.py"]
auto_download = true
auto_apply = true

[paths]
live_dir = "/opt/frame/app"

[source]
kind = "branch"
repo = "acme/frame"
branch = "stable"

[restart]
kind = "systemctl"
service = "frame"
use_sudo = false
"#;

#[test]
fn cli_path_beats_environment() {
    with_env_lock(|| {
        let _env = EnvGuard::new(ENV_KEYS);
        let dir = TempDir::new().unwrap();
        let cli = dir.path().join("cli").join("uplift.toml");
        let from_env = dir.path().join("env").join("uplift.toml");
        write_config(&cli, "auto_check_hours = 6\n");
        write_config(&from_env, "auto_check_hours = 12\n");
        env::set_var("UPLIFT_CONFIG", &from_env);

        let loaded = load_config(Some(&cli)).unwrap();
        assert_eq!(loaded.source, ConfigSource::CliArgument);
        assert_eq!(loaded.config.auto_check_hours, 6);

        let loaded = load_config(None).unwrap();
        assert_eq!(loaded.source, ConfigSource::Environment);
        assert_eq!(loaded.config.auto_check_hours, 12);
    });
}

#[test]
fn config_dir_env_then_xdg() {
    with_env_lock(|| {
        let _env = EnvGuard::new(ENV_KEYS);
        let dir = TempDir::new().unwrap();

        let xdg = dir.path().join("xdg");
        write_config(&xdg.join("uplift").join("uplift.toml"), "auto_check = false\n");
        env::set_var("XDG_CONFIG_HOME", &xdg);

        let (path, source) = resolve_config_path(None);
        if cfg!(target_os = "linux") {
            assert_eq!(source, ConfigSource::XdgConfig);
            assert_eq!(path, Some(xdg.join("uplift").join("uplift.toml")));
        }

        let cfg_dir = dir.path().join("confdir");
        write_config(&cfg_dir.join("uplift.toml"), "auto_check = true\n");
        env::set_var("UPLIFT_CONFIG_DIR", &cfg_dir);

        let (path, source) = resolve_config_path(None);
        assert_eq!(source, ConfigSource::Environment);
        assert_eq!(path, Some(cfg_dir.join("uplift.toml")));
    });
}

#[test]
fn missing_env_path_falls_through() {
    with_env_lock(|| {
        let _env = EnvGuard::new(ENV_KEYS);
        let dir = TempDir::new().unwrap();
        env::set_var("UPLIFT_CONFIG", dir.path().join("absent.toml"));
        env::set_var("XDG_CONFIG_HOME", dir.path().join("empty-xdg"));

        let (_, source) = resolve_config_path(None);
        assert_ne!(source, ConfigSource::Environment);
    });
}

#[test]
fn device_config_loads_and_validates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("uplift.toml");
    write_config(&path, DEVICE_CONFIG);

    let loaded = load_config(Some(&path)).unwrap();
    let cfg = loaded.config;
    validate_config(&cfg).unwrap();

    assert_eq!(cfg.paths.state_dir(), PathBuf::from("/opt/frame/.update"));
    assert_eq!(cfg.updateable_dirs, vec!["static", "templates"]);
    assert!(matches!(
        &cfg.source.strategy,
        SourceStrategy::Branch { branch, subdir, .. } if branch == "stable" && subdir == "app"
    ));
    assert_eq!(
        cfg.restart,
        RestartConfig::Systemctl {
            service: "frame".into(),
            use_sudo: false
        }
    );
}

#[test]
fn malformed_file_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("uplift.toml");
    write_config(&path, "max_consecutive_failures = \"two\"\n");

    let err = load_config(Some(&path)).unwrap_err();
    assert!(matches!(err, ValidationError::ParseError(_)));
    assert_eq!(err.code(), 12);
}
