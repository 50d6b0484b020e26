//! Long-running host integration.
//!
//! [`UpdateService::start`] runs the startup health evaluation once, arms a
//! timer that confirms the release when the verification window closes, and
//! starts the periodic scheduler. Dropping the service stops both threads.

use chrono::Utc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use uplift_common::{Error, Result};

use crate::health::StartupVerdict;
use crate::logging::{event_names, Stage};
use crate::manager::UpdateManager;
use crate::scheduler::Scheduler;

/// Pause before retrying a confirm that lost the race for the lock.
const CONFIRM_RETRY: Duration = Duration::from_secs(1);

/// Background thread confirming the pending release at its deadline.
struct ConfirmTimer {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ConfirmTimer {
    fn spawn(manager: UpdateManager, deadline: chrono::DateTime<Utc>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("uplift-verify".to_string())
            .spawn(move || {
                let mut wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                loop {
                    match rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                    match manager.confirm() {
                        Ok(_) => return,
                        Err(Error::OperationInProgress { .. }) => wait = CONFIRM_RETRY,
                        Err(e) => {
                            let ctx = manager.context();
                            crate::log_event!(
                                ctx,
                                ERROR,
                                event_names::VERIFY_CONFIRM_FAILED,
                                Stage::Verify,
                                "automatic confirm failed",
                                error = %e
                            );
                            return;
                        }
                    }
                }
            })
            .map_err(Error::Io)?;
        Ok(Self {
            stop: Some(tx),
            handle: Some(handle),
        })
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

impl Drop for ConfirmTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Startup evaluation plus the background threads of a running host.
pub struct UpdateService {
    manager: UpdateManager,
    verdict: Option<StartupVerdict>,
    timer: Option<ConfirmTimer>,
    scheduler: Option<Scheduler>,
}

impl UpdateService {
    /// Evaluate the persisted state and start the background threads.
    ///
    /// A failed startup evaluation is logged and leaves the service running
    /// without a verdict; the host keeps serving the current release.
    pub fn start(manager: UpdateManager) -> Result<Self> {
        let verdict = match manager.startup() {
            Ok(verdict) => Some(verdict),
            Err(e) => {
                let ctx = manager.context();
                crate::log_event!(
                    ctx,
                    ERROR,
                    event_names::STARTUP_FAILED,
                    Stage::Init,
                    "startup evaluation failed",
                    error = %e,
                    code = e.code()
                );
                None
            }
        };

        let timer = match &verdict {
            Some(StartupVerdict::VerificationWindow { deadline, .. }) => {
                Some(ConfirmTimer::spawn(manager.clone(), *deadline)?)
            }
            _ => None,
        };

        let config = manager.config();
        let scheduler = if config.enabled && config.auto_check {
            Some(Scheduler::spawn(manager.clone())?)
        } else {
            None
        };

        let ctx = manager.context();
        crate::log_event!(
            ctx,
            INFO,
            event_names::SERVICE_STARTED,
            Stage::Init,
            "update service started",
            verifying = timer.is_some(),
            scheduling = scheduler.is_some()
        );

        Ok(Self {
            manager,
            verdict,
            timer,
            scheduler,
        })
    }

    pub fn manager(&self) -> &UpdateManager {
        &self.manager
    }

    /// Outcome of the startup evaluation, if it succeeded.
    pub fn verdict(&self) -> Option<&StartupVerdict> {
        self.verdict.as_ref()
    }

    /// Stop the timer and the scheduler and wait for them.
    pub fn shutdown(mut self) {
        self.stop_threads();
        let ctx = self.manager.context();
        crate::log_event!(
            ctx,
            INFO,
            event_names::SERVICE_STOPPED,
            Stage::Init,
            "update service stopped"
        );
    }

    fn stop_threads(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.shutdown();
        }
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
    }
}

impl Drop for UpdateService {
    fn drop(&mut self) {
        self.stop_threads();
    }
}
