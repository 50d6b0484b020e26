//! Restart requests to the host process supervisor.
//!
//! The trigger only asks for a restart; it never waits for the host to come
//! back. A failed request is reported in the operation result rather than
//! failing the apply or rollback that asked for it.

use serde::Serialize;
use std::process::{Command, Stdio};

use uplift_common::{Error, Result};
use uplift_config::RestartConfig;

use crate::logging::{event_names, LogContext, Stage};

/// Capability to restart the running host.
pub trait RestartTrigger: Send + Sync {
    fn request_restart(&self) -> Result<()>;

    fn describe(&self) -> String;
}

/// The configured restart mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restarter {
    Systemctl { service: String, use_sudo: bool },
    Command { program: String, args: Vec<String> },
    None,
}

impl Restarter {
    pub fn from_config(config: &RestartConfig) -> Self {
        match config {
            RestartConfig::Systemctl { service, use_sudo } => Restarter::Systemctl {
                service: service.clone(),
                use_sudo: *use_sudo,
            },
            RestartConfig::Command { program, args } => Restarter::Command {
                program: program.clone(),
                args: args.clone(),
            },
            RestartConfig::None => Restarter::None,
        }
    }

    /// The argv to run, if any.
    pub fn argv(&self) -> Option<Vec<String>> {
        match self {
            Restarter::Systemctl { service, use_sudo } => {
                let mut argv = Vec::new();
                if *use_sudo {
                    argv.push("sudo".to_string());
                }
                argv.extend(["systemctl".to_string(), "restart".to_string(), service.clone()]);
                Some(argv)
            }
            Restarter::Command { program, args } => {
                let mut argv = vec![program.clone()];
                argv.extend(args.iter().cloned());
                Some(argv)
            }
            Restarter::None => None,
        }
    }
}

impl RestartTrigger for Restarter {
    fn request_restart(&self) -> Result<()> {
        let Some(argv) = self.argv() else {
            return Ok(());
        };
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Restart("empty restart command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Restart(format!("cannot spawn {}: {}", program, e)))?;

        // Reap the child without blocking the caller.
        std::thread::Builder::new()
            .name("uplift-restart-reaper".to_string())
            .spawn(move || {
                let _ = child.wait();
            })
            .map_err(|e| Error::Restart(format!("cannot spawn reaper thread: {}", e)))?;
        Ok(())
    }

    fn describe(&self) -> String {
        match self.argv() {
            Some(argv) => argv.join(" "),
            None => "none".to_string(),
        }
    }
}

/// Whether and how a restart was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartOutcome {
    pub requested: bool,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ask `trigger` for a restart and log the outcome.
pub fn request_restart(trigger: &dyn RestartTrigger, ctx: &LogContext, stage: Stage) -> RestartOutcome {
    let target = trigger.describe();
    match trigger.request_restart() {
        Ok(()) => {
            crate::log_event!(
                ctx,
                INFO,
                event_names::RESTART_REQUESTED,
                stage,
                "restart requested",
                target = %target
            );
            RestartOutcome {
                requested: true,
                target,
                error: None,
            }
        }
        Err(e) => {
            crate::log_event!(
                ctx,
                ERROR,
                event_names::RESTART_FAILED,
                stage,
                "restart request failed",
                target = %target,
                error = %e
            );
            RestartOutcome {
                requested: false,
                target,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systemctl_argv() {
        let restarter = Restarter::from_config(&RestartConfig::Systemctl {
            service: "fotoframe".into(),
            use_sudo: true,
        });
        assert_eq!(restarter.describe(), "sudo systemctl restart fotoframe");

        let plain = Restarter::Systemctl {
            service: "fotoframe".into(),
            use_sudo: false,
        };
        assert_eq!(plain.argv().unwrap(), vec!["systemctl", "restart", "fotoframe"]);
    }

    #[test]
    fn test_none_is_noop() {
        let restarter = Restarter::from_config(&RestartConfig::None);
        assert!(restarter.request_restart().is_ok());
        assert_eq!(restarter.describe(), "none");
    }

    #[test]
    fn test_spawn_failure_is_reported_not_raised() {
        let restarter = Restarter::Command {
            program: "/nonexistent/uplift-restart-helper".into(),
            args: vec![],
        };
        let ctx = LogContext::new("run-test", "host-test");
        let outcome = request_restart(&restarter, &ctx, Stage::Apply);
        assert!(!outcome.requested);
        assert!(outcome.error.unwrap().contains("cannot spawn"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_spawns() {
        let restarter = Restarter::Command {
            program: "true".into(),
            args: vec![],
        };
        assert!(restarter.request_restart().is_ok());
    }
}
