//! Structured logging foundation for uplift-core.
//!
//! Provides dual-mode logging:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for the daemon and automation
//!
//! # Usage
//!
//! ```ignore
//! use uplift_core::logging::{init_logging, LogConfig, LogContext, Stage, event_names};
//!
//! let config = LogConfig::from_env(None, None);
//! init_logging(&config);
//!
//! let ctx = LogContext::new(generate_run_id(), get_host_id());
//! log_event!(ctx, INFO, event_names::CHECK_STARTED, Stage::Check, "checking remote");
//! ```
//!
//! stdout is reserved for command payloads; all log output goes to stderr.
//! The [`LogContext`] is created once at startup and handed to every
//! component constructor.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LevelFilter, LogConfig, LogFormat};
pub use events::{event_names, Level, LogContext, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::fmt;

/// Initialize the logging subsystem.
///
/// Call once at startup. A second call is a no-op.
pub fn init_logging(config: &LogConfig) {
    let filter = config.env_filter();

    match config.format {
        LogFormat::Human => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(std::io::stderr().is_terminal());
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init();
        }
        LogFormat::Jsonl => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(JsonlLayer::stderr())
                .try_init();
        }
    }
}

/// Generate a unique run ID for this invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    format!("run-{}", &uuid.simple().to_string()[..12])
}

/// Get the host ID for logging.
///
/// Uses machine-id on Linux, otherwise a hash of the hostname.
pub fn get_host_id() -> String {
    if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
        let id = id.trim();
        if id.len() >= 8 && id.is_ascii() {
            return format!("host-{}", &id[..8]);
        }
    }

    if let Ok(hostname) = std::env::var("HOSTNAME") {
        let hash = uplift_common::sha256_hex(hostname.as_bytes());
        return format!("host-{}", &hash[..8]);
    }

    format!("host-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

/// Emit a structured event with the correlation IDs of a [`LogContext`].
///
/// ```ignore
/// log_event!(ctx, INFO, event_names::CHECK_STARTED, Stage::Check, "checking remote");
/// log_event!(ctx, WARN, event_names::DOWNLOAD_FILE_SKIPPED, Stage::Download,
///     "optional file missing upstream", path = %rel);
/// ```
#[macro_export]
macro_rules! log_event {
    (@emit $level:ident, $ctx:expr, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        tracing::$level!(
            target: $event,
            run_id = %$ctx.run_id,
            operation_id = $ctx.operation_id.as_deref().unwrap_or(""),
            host_id = %$ctx.host_id,
            stage = %$stage,
            $($($field)+ ,)?
            "{}", $msg
        )
    };
    ($ctx:expr, INFO, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        $crate::log_event!(@emit info, $ctx, $event, $stage, $msg $(, $($field)+)?)
    };
    ($ctx:expr, DEBUG, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        $crate::log_event!(@emit debug, $ctx, $event, $stage, $msg $(, $($field)+)?)
    };
    ($ctx:expr, WARN, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        $crate::log_event!(@emit warn, $ctx, $event, $stage, $msg $(, $($field)+)?)
    };
    ($ctx:expr, ERROR, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        $crate::log_event!(@emit error, $ctx, $event, $stage, $msg $(, $($field)+)?)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_id() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();

        assert!(id1.starts_with("run-"));
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 16);
    }

    #[test]
    fn test_get_host_id() {
        let host_id = get_host_id();
        assert!(host_id.starts_with("host-"));
        assert!(host_id.len() >= 13);
    }

    #[test]
    fn test_stage_serialization() {
        assert_eq!(serde_json::to_string(&Stage::Rollback).unwrap(), "\"rollback\"");
        assert_eq!(Stage::Download.to_string(), "download");
    }

    #[test]
    fn test_level_from_tracing() {
        assert_eq!(Level::from(tracing::Level::INFO), Level::Info);
        assert_eq!(Level::from(tracing::Level::ERROR), Level::Error);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LogConfig::from_env(Some(LevelFilter::OFF), None);
        init_logging(&config);
        init_logging(&config);
    }
}
