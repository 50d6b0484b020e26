//! uplift configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for `uplift.toml`
//! - Config resolution (CLI → env → XDG → /etc → defaults)
//! - Semantic validation

pub mod config;
pub mod resolve;
pub mod validate;

pub use config::{PathsConfig, RestartConfig, SourceConfig, SourceStrategy, UpdateConfig};
pub use resolve::{load_config, resolve_config_path, ConfigSource, LoadedConfig};
pub use validate::{validate_config, ValidationError, ValidationResult};
