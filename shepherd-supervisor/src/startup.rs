//! Startup readiness barrier
//!
//! After the initial spawns, serving is withheld until every worker reports
//! ready. Any worker death or reported error during the window fails the
//! whole batch: the remaining workers are torn down through the normal
//! shutdown sequence and the startup returns an error naming the culprit.

use std::time::Instant;
use tokio::time::sleep;
use tracing::{info, warn};

use shepherd_config::SupervisorConfig;

use crate::error::SupervisorError;
use crate::exit::ExitFlag;
use crate::handle::{WorkerHandle, WorkerState};
use crate::shutdown::ShutdownCoordinator;

/// Polls a worker batch until ready, faulted or aborted
#[derive(Debug, Clone)]
pub struct StartupWatcher {
    poll_interval: std::time::Duration,
    error_grace: std::time::Duration,
    startup_timeout: Option<std::time::Duration>,
    log_throttle: std::time::Duration,
}

impl StartupWatcher {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            poll_interval: config.startup_poll_interval,
            error_grace: config.error_grace,
            startup_timeout: config.startup_timeout,
            log_throttle: config.log_throttle,
        }
    }

    /// Block until every worker is ready.
    ///
    /// On any failure path the surviving workers are already torn down when
    /// the error returns, so the caller only has to close its endpoint.
    pub async fn wait_all_ready(
        &self,
        handles: &mut [WorkerHandle],
        exit: &ExitFlag,
        shutdown: &ShutdownCoordinator,
    ) -> Result<(), SupervisorError> {
        let started = Instant::now();
        let mut last_report = Instant::now();

        loop {
            if exit.is_stopped() {
                warn!("Signal received during startup, stopping workers");
                shutdown.shutdown_workers(handles).await;
                return Err(SupervisorError::StartupFault {
                    reason: "startup aborted by signal".to_string(),
                });
            }

            if let Some(fault) = self.detect_fault(handles) {
                let reason = self.await_fault_reason(&fault, handles).await;
                shutdown.shutdown_workers(handles).await;
                return Err(SupervisorError::StartupFault { reason });
            }

            if handles.iter().all(|h| h.is_ready()) {
                for handle in handles.iter_mut() {
                    handle.set_state(WorkerState::Ready);
                }
                info!(workers = handles.len(), elapsed_ms = started.elapsed().as_millis() as u64,
                    "All workers are ready");
                return Ok(());
            }

            if let Some(timeout) = self.startup_timeout {
                if started.elapsed() >= timeout {
                    shutdown.shutdown_workers(handles).await;
                    return Err(SupervisorError::StartupFault {
                        reason: format!("workers not ready within {:?}", timeout),
                    });
                }
            }

            let now = Instant::now();
            if now.duration_since(last_report) >= self.log_throttle {
                let pending: Vec<&str> = handles
                    .iter()
                    .filter(|h| !h.is_ready())
                    .map(|h| h.worker_key.as_str())
                    .collect();
                info!(pending = ?pending, "Waiting for workers to become ready");
                last_report = now;
            }

            sleep(self.poll_interval).await;
        }
    }

    /// First worker that died or reported a fatal error, by key
    fn detect_fault(&self, handles: &[WorkerHandle]) -> Option<String> {
        handles
            .iter()
            .find(|h| !h.is_alive() || h.notified_error().is_some())
            .map(|h| h.worker_key.clone())
    }

    /// Give a dying worker a short window to deliver its error text, so the
    /// startup failure names the root cause instead of just the exit.
    async fn await_fault_reason(&self, worker_key: &str, handles: &[WorkerHandle]) -> String {
        let handle = handles
            .iter()
            .find(|h| h.worker_key == worker_key);
        let Some(handle) = handle else {
            return format!("worker {} failed during startup", worker_key);
        };

        let deadline = Instant::now() + self.error_grace;
        loop {
            if let Some(error) = handle.notified_error() {
                return format!("worker {} failed during startup: {}", worker_key, error);
            }
            if Instant::now() >= deadline {
                return format!("worker {} exited during startup", worker_key);
            }
            sleep(self.poll_interval.min(std::time::Duration::from_millis(10))).await;
        }
    }
}
