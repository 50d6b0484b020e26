//! Configuration validation errors and semantic validation.

use thiserror::Error;
use uplift_common::RelPath;

use crate::config::{RestartConfig, SourceStrategy, UpdateConfig};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 11,
            ValidationError::ParseError(_) => 12,
            ValidationError::SemanticError(_) => 13,
            ValidationError::MissingField(_) => 14,
            ValidationError::InvalidValue { .. } => 15,
        }
    }
}

impl From<ValidationError> for uplift_common::Error {
    fn from(err: ValidationError) -> Self {
        uplift_common::Error::Config(err.to_string())
    }
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

/// Validate a configuration semantically.
pub fn validate_config(config: &UpdateConfig) -> ValidationResult<()> {
    if config.max_consecutive_failures < 1 {
        return Err(invalid("max_consecutive_failures", "Must be at least 1"));
    }
    if config.verification_window_secs < 1 {
        return Err(invalid("verification_window_secs", "Must be at least 1 second"));
    }
    if config.auto_check_hours < 1 {
        return Err(invalid("auto_check_hours", "Must be at least 1 hour"));
    }
    if config.auto_apply && !config.auto_download {
        return Err(ValidationError::SemanticError(
            "auto_apply requires auto_download".to_string(),
        ));
    }

    validate_source(config)?;
    validate_restart(&config.restart)?;

    for (idx, dir) in config.updateable_dirs.iter().enumerate() {
        validate_relative(&format!("updateable_dirs[{}]", idx), dir)?;
    }
    if config.required_files.is_empty() {
        return Err(ValidationError::MissingField("required_files".to_string()));
    }
    for (idx, file) in config.required_files.iter().enumerate() {
        validate_relative(&format!("required_files[{}]", idx), file)?;
    }
    for (idx, dir) in config.exclude_dirs.iter().enumerate() {
        validate_relative(&format!("exclude_dirs[{}]", idx), dir)?;
    }
    for (idx, ext) in config.file_extensions.iter().enumerate() {
        if !ext.starts_with('.') || ext.len() < 2 {
            return Err(invalid(
                format!("file_extensions[{}]", idx),
                format!("Must look like '.ext', got {:?}", ext),
            ));
        }
    }

    validate_paths(config)
}

fn validate_source(config: &UpdateConfig) -> ValidationResult<()> {
    if config.source.timeout_secs < 1 {
        return Err(invalid("source.timeout_secs", "Must be at least 1 second"));
    }

    match &config.source.strategy {
        SourceStrategy::Branch {
            repo,
            branch,
            subdir,
        } => {
            validate_repo(repo)?;
            if branch.trim().is_empty() {
                return Err(ValidationError::MissingField("source.branch".to_string()));
            }
            if !subdir.is_empty() {
                validate_relative("source.subdir", subdir)?;
            }
        }
        SourceStrategy::Release {
            repo,
            asset_suffix,
            checksums_asset,
            subdir,
            ..
        } => {
            validate_repo(repo)?;
            if asset_suffix.is_empty() {
                return Err(ValidationError::MissingField("source.asset_suffix".to_string()));
            }
            if checksums_asset.is_empty() {
                return Err(ValidationError::MissingField(
                    "source.checksums_asset".to_string(),
                ));
            }
            if !subdir.is_empty() {
                validate_relative("source.subdir", subdir)?;
            }
        }
        SourceStrategy::Directory { path } => {
            if path.as_os_str().is_empty() {
                return Err(ValidationError::MissingField("source.path".to_string()));
            }
        }
    }

    Ok(())
}

fn validate_repo(repo: &str) -> ValidationResult<()> {
    if repo.is_empty() {
        return Err(ValidationError::MissingField("source.repo".to_string()));
    }
    let mut parts = repo.split('/');
    let well_formed = match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) => {
            let ok = |s: &str| {
                !s.is_empty()
                    && s != "."
                    && s != ".."
                    && s
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            };
            ok(owner) && ok(name)
        }
        _ => false,
    };
    if !well_formed {
        return Err(invalid(
            "source.repo",
            format!("Must be 'owner/name', got {:?}", repo),
        ));
    }
    Ok(())
}

fn validate_restart(restart: &RestartConfig) -> ValidationResult<()> {
    match restart {
        RestartConfig::Systemctl { service, .. } if service.trim().is_empty() => {
            Err(ValidationError::MissingField("restart.service".to_string()))
        }
        RestartConfig::Command { program, .. } if program.trim().is_empty() => {
            Err(ValidationError::MissingField("restart.program".to_string()))
        }
        _ => Ok(()),
    }
}

fn validate_relative(field: &str, value: &str) -> ValidationResult<()> {
    RelPath::new(value)
        .map(|_| ())
        .map_err(|e| invalid(field, e.to_string()))
}

fn validate_paths(config: &UpdateConfig) -> ValidationResult<()> {
    let live = &config.paths.live_dir;
    if live.as_os_str().is_empty() {
        return Err(ValidationError::MissingField("paths.live_dir".to_string()));
    }

    let state = config.paths.state_dir();
    let live_norm = lexical_normalize(live);
    let state_norm = lexical_normalize(&state);
    if state_norm.starts_with(&live_norm) {
        return Err(invalid(
            "paths.state_dir",
            format!(
                "{} must not be inside the live tree {}",
                state.display(),
                live.display()
            ),
        ));
    }

    Ok(())
}

/// Drop `.` components and resolve `..` textually; no filesystem access.
fn lexical_normalize(path: &std::path::Path) -> std::path::PathBuf {
    use std::path::Component;
    let mut out = std::path::PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
