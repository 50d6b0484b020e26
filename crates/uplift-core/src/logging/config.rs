//! Where log verbosity and format come from.
//!
//! Highest precedence first:
//! 1. `--log-level` / `--log-format`
//! 2. `UPLIFT_LOG` (a level) / `UPLIFT_LOG_FORMAT`
//! 3. `RUST_LOG`, passed through as a full filter directive
//! 4. `info`, human-readable
//!
//! Values that do not parse are ignored and the next source is tried.

use std::str::FromStr;

pub use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const LEVEL_ENV: &str = "UPLIFT_LOG";
pub const FORMAT_ENV: &str = "UPLIFT_LOG_FORMAT";
const DEFAULT_FILTER: &str = "info";

/// How events are written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per line.
    Jsonl,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const HUMAN: [&str; 3] = ["human", "text", "pretty"];
        const JSONL: [&str; 3] = ["jsonl", "json", "ndjson"];
        if HUMAN.iter().any(|n| s.eq_ignore_ascii_case(n)) {
            Ok(LogFormat::Human)
        } else if JSONL.iter().any(|n| s.eq_ignore_ascii_case(n)) {
            Ok(LogFormat::Jsonl)
        } else {
            Err(format!("unknown log format {:?} (expected human or jsonl)", s))
        }
    }
}

/// Resolved logging settings, consumed by [`super::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. `warn` or `uplift_core=debug,info`.
    pub filter: String,
}

impl LogConfig {
    /// Resolve settings from CLI flags and the process environment.
    pub fn from_env(cli_level: Option<LevelFilter>, cli_format: Option<LogFormat>) -> Self {
        Self::resolve(cli_level, cli_format, |key| std::env::var(key).ok())
    }

    fn resolve(
        cli_level: Option<LevelFilter>,
        cli_format: Option<LogFormat>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let filter = cli_level
            .or_else(|| env(LEVEL_ENV).and_then(|v| v.trim().parse().ok()))
            .map(|level| level.to_string())
            .or_else(|| env("RUST_LOG").filter(|v| EnvFilter::try_new(v).is_ok()))
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());

        let format = cli_format
            .or_else(|| env(FORMAT_ENV).and_then(|v| v.trim().parse().ok()))
            .unwrap_or_default();

        LogConfig { format, filter }
    }

    pub(crate) fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}
