//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths →
//! system config → defaults.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::UpdateConfig;
use crate::validate::{ValidationError, ValidationResult};

/// Where the configuration file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Explicitly provided via `--config`.
    CliArgument,

    /// Set via `UPLIFT_CONFIG` or `UPLIFT_CONFIG_DIR`.
    Environment,

    /// Found in the XDG config directory.
    XdgConfig,

    /// Found in /etc/uplift/.
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

/// Environment variable names.
pub const ENV_CONFIG_PATH: &str = "UPLIFT_CONFIG";
pub const ENV_CONFIG_DIR: &str = "UPLIFT_CONFIG_DIR";

/// Standard config file name.
pub const CONFIG_FILENAME: &str = "uplift.toml";

/// Application name for XDG directories.
const APP_NAME: &str = "uplift";

/// A resolved configuration together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: UpdateConfig,
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Resolve the configuration file path.
///
/// 1. Explicit CLI path
/// 2. `UPLIFT_CONFIG`
/// 3. `UPLIFT_CONFIG_DIR` + `uplift.toml`
/// 4. XDG config directory (`~/.config/uplift/uplift.toml`)
/// 5. System config (`/etc/uplift/uplift.toml`)
/// 6. Built-in defaults (None)
///
/// An explicit CLI path is returned even when it does not exist, so that
/// loading it reports the mistake instead of silently falling through.
pub fn resolve_config_path(cli_path: Option<&Path>) -> (Option<PathBuf>, ConfigSource) {
    // 1. CLI argument
    if let Some(path) = cli_path {
        return (Some(path.to_path_buf()), ConfigSource::CliArgument);
    }

    // 2. Environment variable (direct path)
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    // 3. Environment variable (config dir)
    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    // 4. XDG config directory
    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::XdgConfig);
        }
    }

    // 5. System config
    let system_path = system_config_dir().join(CONFIG_FILENAME);
    if system_path.exists() {
        return (Some(system_path), ConfigSource::SystemConfig);
    }

    (None, ConfigSource::BuiltinDefault)
}

/// Resolve and parse the configuration. No semantic validation.
pub fn load_config(cli_path: Option<&Path>) -> ValidationResult<LoadedConfig> {
    let (path, source) = resolve_config_path(cli_path);
    let config = match &path {
        Some(p) => {
            if !p.exists() {
                return Err(ValidationError::IoError(format!(
                    "config file {} does not exist",
                    p.display()
                )));
            }
            UpdateConfig::from_file(p)?
        }
        None => UpdateConfig::default(),
    };

    Ok(LoadedConfig {
        config,
        path,
        source,
    })
}

/// Get the XDG config directory for uplift.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the system config directory.
pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}
