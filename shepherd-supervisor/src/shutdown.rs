//! Two-phase worker shutdown
//!
//! Every worker first gets an interrupt and a bounded grace window to exit
//! on its own. Workers still alive when the window closes are killed. The
//! whole sequence is bounded by the configured wait, so shutdown can never
//! hang on a wedged worker.

use std::time::Instant;
use tokio::time::sleep;
use tracing::{info, warn};

use shepherd_config::SupervisorConfig;

use crate::handle::{WorkerHandle, WorkerState};
use crate::launcher::ExitSignalKind;

/// Executes the graceful-then-forced stop sequence over a set of handles
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    shutdown_wait: std::time::Duration,
    poll_interval: std::time::Duration,
    log_throttle: std::time::Duration,
}

impl ShutdownCoordinator {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            shutdown_wait: config.shutdown_wait,
            poll_interval: config.shutdown_poll_interval,
            log_throttle: config.log_throttle,
        }
    }

    /// Stop all workers: interrupt, wait up to the budget, then kill.
    ///
    /// Safe to call with some or all workers already exited; signalling a
    /// dead process is a no-op. Returns the number of workers that had to
    /// be killed.
    pub async fn shutdown_workers(&self, handles: &mut [WorkerHandle]) -> usize {
        if handles.is_empty() {
            return 0;
        }

        for handle in handles.iter_mut() {
            // also sent to dead workers so their exit is recorded as requested
            handle.send_exit_signal(ExitSignalKind::Interrupt);
            handle.set_state(WorkerState::Dead);
        }
        info!(workers = handles.len(), "Waiting for workers to exit");

        let deadline = Instant::now() + self.shutdown_wait;
        let mut last_report = Instant::now();
        loop {
            let alive: Vec<&WorkerHandle> =
                handles.iter().filter(|h| h.is_alive()).collect();
            if alive.is_empty() {
                info!("All workers exited");
                return 0;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if now.duration_since(last_report) >= self.log_throttle {
                let remaining = deadline.duration_since(now).as_secs();
                warn!(
                    alive = alive.len(),
                    remaining_secs = remaining,
                    "Workers still exiting"
                );
                last_report = now;
            }
            sleep(self.poll_interval).await;
        }

        let mut killed = 0;
        for handle in handles.iter_mut() {
            if handle.is_alive() {
                warn!(worker = %handle.worker_key, pid = handle.pid(),
                    "Worker did not exit in time, killing");
                handle.send_exit_signal(ExitSignalKind::Kill);
                killed += 1;
            }
        }
        killed
    }
}
