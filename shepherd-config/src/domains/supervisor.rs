//! Supervision timing and restart policy configuration

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Worker supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Program spawned for every worker process
    pub worker_program: PathBuf,

    /// Extra arguments prepended before the worker's own arguments
    #[serde(default)]
    pub worker_args: Vec<String>,

    /// Directory holding the per-run unix sockets
    pub socket_dir: PathBuf,

    /// Poll interval of the startup readiness barrier
    #[serde(with = "crate::domains::utils::serde_duration")]
    pub startup_poll_interval: Duration,

    /// How long to wait for a failing worker's error text to arrive before
    /// the batch is aborted
    #[serde(with = "crate::domains::utils::serde_duration")]
    pub error_grace: Duration,

    /// Optional hard deadline for the startup barrier. The barrier otherwise
    /// waits indefinitely for a worker that stays alive but never reports
    /// ready, matching deployments that rely on an external orchestrator
    /// timeout.
    #[serde(with = "crate::domains::utils::serde_duration_option")]
    pub startup_timeout: Option<Duration>,

    /// Tick of the steady-state health monitor loop
    #[serde(with = "crate::domains::utils::serde_duration")]
    pub monitor_tick: Duration,

    /// Budget of the graceful shutdown wait before escalating to kill
    #[serde(with = "crate::domains::utils::serde_duration")]
    pub shutdown_wait: Duration,

    /// Poll tick while waiting for workers to exit
    #[serde(with = "crate::domains::utils::serde_duration")]
    pub shutdown_poll_interval: Duration,

    /// Minimum interval between repeated progress/warning log lines
    #[serde(with = "crate::domains::utils::serde_duration")]
    pub log_throttle: Duration,

    /// Whether a worker that died of a fault may be relaunched
    pub restart_on_fault: bool,

    /// Retry budget per worker
    pub max_restart_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            worker_program: PathBuf::from("shepherd-worker"),
            worker_args: Vec::new(),
            socket_dir: PathBuf::from("unix_socket_files"),
            startup_poll_interval: Duration::from_millis(100),
            error_grace: Duration::from_secs(1),
            startup_timeout: None,
            monitor_tick: Duration::from_millis(10),
            shutdown_wait: Duration::from_secs(10),
            shutdown_poll_interval: Duration::from_millis(10),
            log_throttle: Duration::from_secs(1),
            restart_on_fault: true,
            max_restart_attempts: 3,
        }
    }
}

impl Validatable for SupervisorConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.worker_program.as_os_str().is_empty() {
            return Err(self.validation_error("worker_program cannot be empty"));
        }
        if self.socket_dir.as_os_str().is_empty() {
            return Err(self.validation_error("socket_dir cannot be empty"));
        }
        for (name, duration) in [
            ("startup_poll_interval", self.startup_poll_interval),
            ("error_grace", self.error_grace),
            ("monitor_tick", self.monitor_tick),
            ("shutdown_wait", self.shutdown_wait),
            ("shutdown_poll_interval", self.shutdown_poll_interval),
            ("log_throttle", self.log_throttle),
        ] {
            if duration.is_zero() {
                return Err(self.validation_error(format!("{} must be greater than 0", name)));
            }
        }
        if let Some(timeout) = self.startup_timeout {
            if timeout.is_zero() {
                return Err(self.validation_error("startup_timeout must be greater than 0"));
            }
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "supervisor"
    }
}
