//! Live worker handles
//!
//! A [`WorkerHandle`] pairs an immutable [`WorkerSpec`] with the currently
//! running process for it. Restarts replace the process inside the handle;
//! the spec, key and status cell stay, so the rest of the supervisor keeps a
//! stable view of the worker across process replacement.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use shepherd_config::SupervisorConfig;
use shepherd_ipc::endpoint;

use crate::error::SupervisorError;
use crate::launcher::{ExitSignalKind, LaunchEnv, LaunchRequest, ProcessLauncher, WorkerProcess};
use crate::registration::WorkerStatusCell;
use crate::spec::WorkerSpec;

/// Supervision state of one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Process started, readiness not yet reported
    Spawned,
    /// Reported ready through the registration endpoint
    Ready,
    /// Old process being replaced by a new one
    Restarting,
    /// Exited abnormally with no restart budget left
    Faulted,
    /// Exited because we asked it to
    Dead,
}

/// Restart rules applied to fault exits
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub restart_on_fault: bool,
    pub max_restart_attempts: u32,
}

impl From<&SupervisorConfig> for RestartPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            restart_on_fault: config.restart_on_fault,
            max_restart_attempts: config.max_restart_attempts,
        }
    }
}

/// One supervised worker: spec, process, endpoint and status
#[derive(Debug)]
pub struct WorkerHandle {
    pub spec: WorkerSpec,
    pub worker_key: String,
    pub index: usize,
    pub address: PathBuf,
    process: Box<dyn WorkerProcess>,
    cell: Arc<WorkerStatusCell>,
    state: WorkerState,
    restart_count: u32,
    exit_requested: bool,
    switching: bool,
}

impl WorkerHandle {
    pub fn new(
        spec: WorkerSpec,
        worker_key: String,
        index: usize,
        address: PathBuf,
        process: Box<dyn WorkerProcess>,
        cell: Arc<WorkerStatusCell>,
    ) -> Self {
        Self {
            spec,
            worker_key,
            index,
            address,
            process,
            cell,
            state: WorkerState::Spawned,
            restart_count: 0,
            exit_requested: false,
            switching: false,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// OS-level liveness of the current process
    pub fn is_alive(&self) -> bool {
        self.process.is_alive()
    }

    /// Whether the worker reported ready over the registration endpoint
    pub fn is_ready(&self) -> bool {
        self.cell.is_ready()
    }

    /// Whether the worker reported itself unavailable
    pub fn is_unavailable(&self) -> bool {
        self.cell.is_unavailable()
    }

    /// Fatal error text reported by the worker, if any
    pub fn notified_error(&self) -> Option<String> {
        self.cell.error()
    }

    /// Whether a restart is in flight for this handle
    pub fn is_in_process_switching(&self) -> bool {
        self.switching
    }

    /// An exit we did not request is a fault
    pub fn is_fault_exit(&self) -> bool {
        !self.exit_requested
    }

    pub fn can_be_restarted(&self, policy: &RestartPolicy) -> bool {
        policy.restart_on_fault
            && !self.switching
            && self.restart_count < policy.max_restart_attempts
    }

    /// Short identity for log lines
    pub fn describe(&self) -> String {
        self.spec.describe()
    }

    /// Best-effort delivery of an exit request to the current process
    pub fn send_exit_signal(&mut self, kind: ExitSignalKind) {
        self.exit_requested = true;
        if let Err(e) = self.process.send_signal(kind) {
            warn!(worker = %self.worker_key, error = %e, "Failed to signal worker");
        }
    }

    /// Replace the current process with a freshly launched one.
    ///
    /// The new process gets a new endpoint address so a lingering old
    /// process can never shadow it. On launch failure the handle is left
    /// faulted with the old process still attached.
    pub async fn restart(
        &mut self,
        launcher: &dyn ProcessLauncher,
        env: &LaunchEnv,
    ) -> Result<(), SupervisorError> {
        self.switching = true;
        self.state = WorkerState::Restarting;
        info!(worker = %self.worker_key, attempt = self.restart_count + 1,
            "Restarting worker");

        if self.process.is_alive() {
            if let Err(e) = self.process.send_signal(ExitSignalKind::Interrupt) {
                warn!(worker = %self.worker_key, error = %e,
                    "Failed to interrupt stale worker before restart");
            }
        }
        self.cell.reset();

        let address = endpoint::worker_address(
            &env.socket_dir,
            &self.spec.servable_name,
            self.spec.device_id().unwrap_or(0),
            env.master_pid,
            env.next_seq(),
        )
        .map_err(SupervisorError::Ipc)?;
        let request = LaunchRequest::for_worker(&self.spec, env, &address, &self.worker_key);

        match launcher.launch(&request).await {
            Ok(process) => {
                self.process = process;
                self.address = address;
                self.restart_count += 1;
                self.exit_requested = false;
                self.switching = false;
                // Readiness is reported by the new process itself, so the
                // handle goes back to Spawned until the cell says otherwise.
                self.state = WorkerState::Spawned;
                info!(worker = %self.worker_key, pid = self.pid(), "Worker restarted");
                Ok(())
            }
            Err(e) => {
                self.switching = false;
                self.state = WorkerState::Faulted;
                warn!(worker = %self.worker_key, error = %e, "Worker restart failed");
                Err(e)
            }
        }
    }
}
