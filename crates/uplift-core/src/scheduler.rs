//! Periodic background checks.
//!
//! Every `auto_check_hours` the scheduler runs one cycle: check, then
//! download and apply when the configuration asks for it. Cycles are
//! skipped while verification is pending, updates are disabled, or another
//! operation is running.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use uplift_common::{Error, ErrorReport, Result, Version};

use crate::logging::{event_names, Stage};
use crate::manager::UpdateManager;
use crate::resolver::CheckOutcome;

/// Shortest pause between two cycles.
const MIN_WAIT: Duration = Duration::from_secs(60);

/// Whether a check is due.
pub fn check_due(
    last_check: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval: ChronoDuration,
) -> bool {
    match last_check {
        Some(last) => now - last >= interval,
        None => true,
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<CheckOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl CycleReport {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Run one scheduler cycle now.
pub fn run_cycle(manager: &UpdateManager) -> CycleReport {
    let report = match skip_reason(manager) {
        Some(reason) => CycleReport::skipped(reason),
        None => {
            let mut report = CycleReport::default();
            if let Err(e) = cycle_steps(manager, &mut report) {
                report.error = Some(e.report());
            }
            report
        }
    };

    let ctx = manager.context();
    crate::log_event!(
        ctx,
        INFO,
        event_names::SCHEDULE_CYCLE,
        Stage::Schedule,
        "scheduled update cycle finished",
        skipped = report.skipped.as_deref().unwrap_or(""),
        staged = report.staged.is_some(),
        applied = report.applied.is_some(),
        failed = report.error.is_some()
    );
    report
}

fn skip_reason(manager: &UpdateManager) -> Option<String> {
    let status = manager.status();
    if !status.updates_enabled {
        return Some("updates disabled in configuration".to_string());
    }
    if let Some(err) = status.state_error {
        return Some(format!("state unreadable: {}", err.message));
    }
    if status.updates_disabled {
        return Some("updates disabled by failure limit".to_string());
    }
    if status.pending_verification {
        return Some("verification pending".to_string());
    }
    if let Some(op) = status.operation {
        return Some(format!("{} in progress", op.kind));
    }
    None
}

fn cycle_steps(manager: &UpdateManager, report: &mut CycleReport) -> Result<()> {
    let config = manager.config();
    let outcome = manager.check()?;
    report.checked = Some(outcome);
    if !outcome.is_update_available() || !config.auto_download {
        return Ok(());
    }

    let staged = manager.download(Some(outcome.remote()))?;
    report.staged = Some(staged.version);
    if !config.auto_apply {
        return Ok(());
    }

    let applied = manager.apply()?;
    report.applied = Some(applied.to_version);
    Ok(())
}

/// Background thread running cycles until stopped.
pub struct Scheduler {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn spawn(manager: UpdateManager) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<()>();
        let hours = manager.config().auto_check_hours.max(1);
        let interval = ChronoDuration::hours(hours.min(24 * 365) as i64);

        let handle = std::thread::Builder::new()
            .name("uplift-scheduler".to_string())
            .spawn(move || loop {
                let last_check = manager.status().last_check;
                if check_due(last_check, Utc::now(), interval) {
                    run_cycle(&manager);
                }

                let last_check = manager.status().last_check;
                let wait = last_check
                    .map(|last| last + interval - Utc::now())
                    .and_then(|d| d.to_std().ok())
                    .unwrap_or(MIN_WAIT)
                    .max(MIN_WAIT);
                match rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        let ctx = manager.context();
                        crate::log_event!(
                            ctx,
                            INFO,
                            event_names::SCHEDULE_STOPPED,
                            Stage::Schedule,
                            "scheduler stopped"
                        );
                        break;
                    }
                }
            })
            .map_err(Error::Io)?;

        Ok(Self {
            stop: Some(tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it. A running cycle finishes first.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_due() {
        let now = Utc::now();
        let day = ChronoDuration::hours(24);
        assert!(check_due(None, now, day));
        assert!(!check_due(Some(now - ChronoDuration::hours(23)), now, day));
        assert!(check_due(Some(now - ChronoDuration::hours(24)), now, day));
    }

    #[test]
    fn test_skipped_report_serialization() {
        let json = serde_json::to_value(CycleReport::skipped("verification pending")).unwrap();
        assert_eq!(json, serde_json::json!({"skipped": "verification pending"}));
    }
}
