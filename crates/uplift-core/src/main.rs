//! uplift - remote update manager for deployed applications
//!
//! The main entry point for the `uplift` binary, handling:
//! - One-shot update operations (check, download, apply, confirm, rollback)
//! - The startup health evaluation
//! - The long-running daemon (verification timer and scheduled checks)
//! - Configuration inspection

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use uplift_common::{Error, Version, STATE_SCHEMA_VERSION};
use uplift_config::{load_config, validate_config, LoadedConfig};
use uplift_core::exit_codes::ExitCode;
use uplift_core::health::{ConfirmOutcome, StartupVerdict};
use uplift_core::log_event;
use uplift_core::logging::{
    event_names, generate_run_id, get_host_id, init_logging, LevelFilter, LogConfig, LogContext,
    LogFormat, Stage,
};
use uplift_core::manager::{StatusReport, UpdateManager};
use uplift_core::resolver::CheckOutcome;
use uplift_core::service::UpdateService;

/// Remote update manager: check, stage, apply, verify and roll back releases
#[derive(Parser)]
#[command(name = "uplift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Output format for command payloads on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Human,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to uplift.toml
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    /// Log format on stderr (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show versions, lifecycle flags and the running operation
    Status,

    /// Compare the local version with the remote's newest
    Check,

    /// Download and stage a release
    Download(DownloadArgs),

    /// Install the staged release and request a restart
    Apply,

    /// Accept the release under verification
    Confirm,

    /// Restore the backup snapshot
    Rollback,

    /// Clear the failure circuit breaker
    Enable,

    /// Run the startup health evaluation once
    Startup,

    /// Run the update service in the foreground until SIGTERM or SIGINT
    Daemon,

    /// Configuration management
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// Release to stage (defaults to the version found by the last check)
    #[arg(long = "version", value_name = "VERSION")]
    target: Option<Version>,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the resolved configuration and where it came from
    Show,

    /// Validate the configuration
    Validate,
}

/// A successful command payload.
struct Outcome {
    result: serde_json::Value,
    summary: String,
    code: ExitCode,
}

impl Outcome {
    fn new(result: &impl Serialize, summary: impl Into<String>, code: ExitCode) -> Result<Self, Error> {
        Ok(Self {
            result: serde_json::to_value(result)?,
            summary: summary.into(),
            code,
        })
    }
}

// ============================================================================
// Main entry point
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env(cli.global.log_level, cli.global.log_format);
    init_logging(&log_config);

    let ctx = LogContext::new(generate_run_id(), get_host_id());
    let command = command_name(&cli.command);

    let outcome = run(&cli.command, &cli.global, &ctx);

    let exit_code = emit(&cli.global, &ctx, command, outcome);
    std::process::exit(exit_code.as_i32());
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Status => "status",
        Commands::Check => "check",
        Commands::Download(_) => "download",
        Commands::Apply => "apply",
        Commands::Confirm => "confirm",
        Commands::Rollback => "rollback",
        Commands::Enable => "enable",
        Commands::Startup => "startup",
        Commands::Daemon => "daemon",
        Commands::Config(args) => match args.command {
            ConfigCommands::Show => "config show",
            ConfigCommands::Validate => "config validate",
        },
    }
}

fn load(global: &GlobalOpts, ctx: &LogContext) -> Result<LoadedConfig, Error> {
    let loaded = load_config(global.config.as_deref())?;
    log_event!(
        ctx,
        INFO,
        event_names::CONFIG_LOADED,
        Stage::Init,
        "configuration loaded",
        source = %loaded.source,
        path = %loaded.path.as_ref().map(|p| p.display().to_string()).unwrap_or_default()
    );
    Ok(loaded)
}

fn load_manager(global: &GlobalOpts, ctx: &LogContext) -> Result<UpdateManager, Error> {
    let loaded = load(global, ctx)?;
    validate_config(&loaded.config)?;
    Ok(UpdateManager::from_config(loaded.config, ctx.clone()))
}

fn run(command: &Commands, global: &GlobalOpts, ctx: &LogContext) -> Result<Outcome, Error> {
    let manager = || load_manager(global, ctx);
    match command {
        Commands::Status => {
            let status = manager()?.status();
            let summary = status_summary(&status);
            Outcome::new(&status, summary, ExitCode::Ok)
        }
        Commands::Check => {
            let outcome = manager()?.check()?;
            let code = match outcome {
                CheckOutcome::UpdateAvailable(_) => ExitCode::UpdateAvailable,
                _ => ExitCode::Ok,
            };
            Outcome::new(&outcome, outcome.message(), code)
        }
        Commands::Download(args) => {
            let report = manager()?.download(args.target)?;
            let summary = format!(
                "staged {} ({} files, {} bytes)",
                report.version, report.files, report.bytes
            );
            Outcome::new(&report, summary, ExitCode::Ok)
        }
        Commands::Apply => {
            let report = manager()?.apply()?;
            let summary = format!(
                "applied {} (was {}), verification pending",
                report.to_version, report.from_version
            );
            Outcome::new(&report, summary, ExitCode::Ok)
        }
        Commands::Confirm => {
            let outcome = manager()?.confirm()?;
            let summary = match outcome {
                ConfirmOutcome::Confirmed(v) => format!("confirmed {}", v),
                ConfirmOutcome::AlreadyConfirmed => "nothing pending".to_string(),
            };
            Outcome::new(&outcome, summary, ExitCode::Ok)
        }
        Commands::Rollback => {
            let report = manager()?.rollback()?;
            let summary = format!("rolled back to {}", report.restored_version);
            Outcome::new(&report, summary, ExitCode::RolledBack)
        }
        Commands::Enable => {
            manager()?.enable()?;
            Outcome::new(&serde_json::json!({"enabled": true}), "updates enabled", ExitCode::Ok)
        }
        Commands::Startup => {
            let verdict = manager()?.startup()?;
            verdict_outcome(&verdict)
        }
        Commands::Daemon => run_daemon(manager()?),
        Commands::Config(args) => run_config(global, args, ctx),
    }
}

fn verdict_outcome(verdict: &StartupVerdict) -> Result<Outcome, Error> {
    let (summary, code) = match verdict {
        StartupVerdict::Idle => ("nothing to verify".to_string(), ExitCode::Ok),
        StartupVerdict::VerificationWindow { version, deadline } => (
            format!("verifying {} until {}", version, deadline.to_rfc3339()),
            ExitCode::Ok,
        ),
        StartupVerdict::RolledBack(report) => (
            format!(
                "rolled back to {}: {}",
                report.restored_version,
                report.cause.describe()
            ),
            ExitCode::RolledBack,
        ),
    };
    Outcome::new(verdict, summary, code)
}

fn status_summary(status: &StatusReport) -> String {
    let show = |v: Option<Version>| v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
    let mut lines = vec![
        format!("current:   {}", show(status.current_version)),
        format!("available: {} ({})", show(status.available_version), status.version_comparison),
        format!("staged:    {}", show(status.staged_version)),
        format!(
            "phase:     {}",
            status.phase.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
        ),
        format!(
            "failures:  {}/{}{}",
            status.consecutive_failures,
            status.max_consecutive_failures,
            if status.updates_disabled { " (updates disabled)" } else { "" }
        ),
        format!(
            "rollback:  {}",
            if status.can_rollback { show(status.backup_version) } else { "unavailable".to_string() }
        ),
        format!("source:    {}", status.source),
    ];
    if status.pending_verification {
        lines.push("verification pending".to_string());
    }
    if let Some(err) = &status.last_error {
        lines.push(format!("last error: {}", err));
    }
    lines.join("\n")
}

// ============================================================================
// Daemon
// ============================================================================

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_signal(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_signal_handlers() {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only stores to an atomic.
    unsafe {
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGINT, handler);
    }
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

fn run_daemon(manager: UpdateManager) -> Result<Outcome, Error> {
    install_signal_handlers();
    let service = UpdateService::start(manager)?;

    if let Some(verdict) = service.verdict() {
        if let Ok(text) = serde_json::to_string(verdict) {
            println!("{}", text);
        }
    }

    while !SHUTDOWN.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(250));
    }

    let verdict = service.verdict().cloned();
    service.shutdown();
    Outcome::new(
        &serde_json::json!({ "stopped": true, "verdict": verdict }),
        "update service stopped",
        ExitCode::Ok,
    )
}

// ============================================================================
// Config commands
// ============================================================================

fn run_config(global: &GlobalOpts, args: &ConfigArgs, ctx: &LogContext) -> Result<Outcome, Error> {
    let loaded = load(global, ctx)?;
    let path = loaded.path.as_ref().map(|p| p.display().to_string());

    match args.command {
        ConfigCommands::Show => {
            let toml = loaded.config.to_toml()?;
            let summary = format!(
                "# source: {} ({})\n{}",
                loaded.source,
                path.as_deref().unwrap_or("no file"),
                toml
            );
            Outcome::new(
                &serde_json::json!({
                    "source": loaded.source,
                    "path": path,
                    "config": loaded.config,
                }),
                summary,
                ExitCode::Ok,
            )
        }
        ConfigCommands::Validate => {
            validate_config(&loaded.config)?;
            Outcome::new(
                &serde_json::json!({
                    "status": "valid",
                    "source": loaded.source,
                    "path": path,
                }),
                "configuration is valid",
                ExitCode::Ok,
            )
        }
    }
}

// ============================================================================
// Output
// ============================================================================

fn emit(
    global: &GlobalOpts,
    ctx: &LogContext,
    command: &str,
    outcome: Result<Outcome, Error>,
) -> ExitCode {
    let (code, payload, text) = match outcome {
        Ok(outcome) => (
            outcome.code,
            ("result", outcome.result),
            outcome.summary,
        ),
        Err(e) => {
            let code = ExitCode::from(&e);
            let report = e.report();
            let text = format!("error: {}", report.message);
            let value = serde_json::to_value(&report).unwrap_or(serde_json::Value::Null);
            (code, ("error", value), text)
        }
    };

    match global.format {
        OutputFormat::Json => {
            let mut envelope = serde_json::json!({
                "schema_version": STATE_SCHEMA_VERSION,
                "command": command,
                "run_id": ctx.run_id,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "ok": !code.is_error(),
                "exit_code": code.code_name(),
            });
            envelope[payload.0] = payload.1;
            match serde_json::to_string_pretty(&envelope) {
                Ok(text) => println!("{}", text),
                Err(e) => eprintln!("uplift: cannot render output: {}", e),
            }
        }
        OutputFormat::Human => {
            if code.is_error() {
                eprintln!("{}", text);
            } else {
                println!("{}", text);
            }
        }
    }
    code
}
