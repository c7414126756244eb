//! Worker process launching and OS-level process control
//!
//! Spawning goes through the [`ProcessLauncher`] trait so supervision logic
//! can be exercised against a fake launcher; the production implementation
//! builds a command line from a typed [`LaunchRequest`] and probes liveness
//! with signal 0 rather than waiting on the child.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::error::SupervisorError;
use crate::spec::{DeploymentTarget, WorkerSpec};

/// Exit request kinds, in escalation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSignalKind {
    /// Graceful stop (SIGINT)
    Interrupt,
    /// Forced stop (SIGKILL)
    Kill,
}

/// A running worker process as seen by the supervisor
pub trait WorkerProcess: Send + Sync + std::fmt::Debug {
    /// OS process id
    fn pid(&self) -> u32;

    /// OS-level liveness check
    fn is_alive(&self) -> bool;

    /// Best-effort delivery of an exit request
    fn send_signal(&self, kind: ExitSignalKind) -> Result<(), SupervisorError>;
}

/// Process-launch capability injected into the master and the health monitor
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start a new worker process for the given request
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn WorkerProcess>, SupervisorError>;
}

/// Per-run launch environment shared between initial spawns and restarts
#[derive(Debug)]
pub struct LaunchEnv {
    /// Program spawned for every worker
    pub program: PathBuf,
    /// Arguments preceding the per-worker ones
    pub base_args: Vec<String>,
    /// Directory holding the per-run sockets
    pub socket_dir: PathBuf,
    /// Address of the master registration socket
    pub master_address: PathBuf,
    /// Master process id, embedded in worker endpoint names
    pub master_pid: u32,
    spawn_seq: AtomicUsize,
}

impl LaunchEnv {
    pub fn new(
        program: PathBuf,
        base_args: Vec<String>,
        socket_dir: PathBuf,
        master_address: PathBuf,
        master_pid: u32,
    ) -> Self {
        Self {
            program,
            base_args,
            socket_dir,
            master_address,
            master_pid,
            spawn_seq: AtomicUsize::new(0),
        }
    }

    /// Next per-run spawn sequence number; every spawn, including restarts,
    /// gets a fresh one so endpoint addresses never repeat within a run.
    pub fn next_seq(&self) -> usize {
        self.spawn_seq.fetch_add(1, Ordering::SeqCst)
    }
}

/// Typed launch request consumed by a [`ProcessLauncher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl LaunchRequest {
    /// Build the command line for one worker from its spec and endpoints
    pub fn for_worker(
        spec: &WorkerSpec,
        env: &LaunchEnv,
        worker_address: &Path,
        worker_key: &str,
    ) -> Self {
        let mut args = env.base_args.clone();
        args.extend([
            "--servable-directory".to_string(),
            spec.servable_directory.to_string_lossy().into_owned(),
            "--servable-name".to_string(),
            spec.servable_name.clone(),
            "--version-number".to_string(),
            spec.version_number.to_string(),
        ]);

        let mut envs = Vec::new();
        match &spec.target {
            DeploymentTarget::Device {
                device_type,
                device_id,
            } => {
                args.extend([
                    "--device-type".to_string(),
                    device_type.clone(),
                    "--device-id".to_string(),
                    device_id.to_string(),
                ]);
                // servable code reads the device of its own worker from here
                envs.push(("SHEPHERD_DEVICE_ID".to_string(), device_id.to_string()));
            }
            DeploymentTarget::Distributed { rank_table_file } => {
                args.extend([
                    "--rank-table-file".to_string(),
                    rank_table_file.to_string_lossy().into_owned(),
                ]);
            }
        }

        args.extend([
            "--master-address".to_string(),
            env.master_address.to_string_lossy().into_owned(),
            "--worker-address".to_string(),
            worker_address.to_string_lossy().into_owned(),
            "--worker-key".to_string(),
            worker_key.to_string(),
            "--listening-master".to_string(),
            spec.listening_master.to_string(),
        ]);

        if let Some(key_file) = &spec.dec_key_file {
            args.extend([
                "--dec-key-file".to_string(),
                key_file.to_string_lossy().into_owned(),
            ]);
            if let Some(mode) = &spec.dec_mode {
                args.extend(["--dec-mode".to_string(), mode.clone()]);
            }
        }

        Self {
            program: env.program.clone(),
            args,
            envs,
        }
    }
}

/// Launcher spawning real OS processes
#[derive(Debug, Default)]
pub struct OsProcessLauncher;

#[async_trait]
impl ProcessLauncher for OsProcessLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn WorkerProcess>, SupervisorError> {
        let mut command = std::process::Command::new(&request.program);
        command.args(&request.args);
        for (name, value) in &request.envs {
            command.env(name, value);
        }

        let child = command.spawn().map_err(|e| SupervisorError::Spawn {
            worker: request.program.to_string_lossy().into_owned(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        debug!(pid, program = %request.program.display(), "Spawned worker process");

        // The child handle is dropped on purpose: SIGCHLD is ignored so the
        // kernel reaps exited children, and liveness is probed with signal 0.
        drop(child);

        Ok(Box::new(OsWorkerProcess { pid }))
    }
}

/// Handle to a spawned OS process, identified only by pid
#[derive(Debug)]
pub struct OsWorkerProcess {
    pid: u32,
}

impl OsWorkerProcess {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }
}

impl WorkerProcess for OsWorkerProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        // Signal 0 probes existence. EPERM means the process exists but is
        // not ours, which still counts as alive.
        match signal::kill(Pid::from_raw(self.pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn send_signal(&self, kind: ExitSignalKind) -> Result<(), SupervisorError> {
        let sig = match kind {
            ExitSignalKind::Interrupt => Signal::SIGINT,
            ExitSignalKind::Kill => Signal::SIGKILL,
        };
        match signal::kill(Pid::from_raw(self.pid as i32), sig) {
            Ok(()) => Ok(()),
            // already gone, nothing to deliver
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(SupervisorError::Signal(format!(
                "failed to signal pid {}: {}",
                self.pid, e
            ))),
        }
    }
}

/// Ignore SIGCHLD so exited workers are reaped by the kernel.
///
/// The master relies on active liveness polling, never on child-death
/// notifications, which would race the restart logic.
pub fn ignore_child_exits() -> Result<(), SupervisorError> {
    unsafe { signal::signal(Signal::SIGCHLD, SigHandler::SigIgn) }
        .map(|_| ())
        .map_err(|e| SupervisorError::Signal(format!("failed to ignore SIGCHLD: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> WorkerSpec {
        WorkerSpec {
            servable_directory: PathBuf::from("/srv/models"),
            servable_name: "resnet".to_string(),
            version_number: 1,
            target: DeploymentTarget::Device {
                device_type: "gpu".to_string(),
                device_id: 3,
            },
            dec_key_file: None,
            dec_mode: None,
            listening_master: true,
        }
    }

    fn env() -> LaunchEnv {
        LaunchEnv::new(
            PathBuf::from("shepherd-worker"),
            vec!["--worker".to_string()],
            PathBuf::from("sock"),
            PathBuf::from("sock/shepherd_master_42"),
            42,
        )
    }

    #[test]
    fn test_launch_request_carries_device_args() {
        let env = env();
        let request =
            LaunchRequest::for_worker(&spec(), &env, Path::new("sock/worker_0"), "resnet_v1_0");

        assert_eq!(request.program, PathBuf::from("shepherd-worker"));
        assert_eq!(request.args[0], "--worker");
        let joined = request.args.join(" ");
        assert!(joined.contains("--servable-name resnet"));
        assert!(joined.contains("--device-id 3"));
        assert!(joined.contains("--master-address sock/shepherd_master_42"));
        assert!(joined.contains("--worker-key resnet_v1_0"));
        assert!(request
            .envs
            .contains(&("SHEPHERD_DEVICE_ID".to_string(), "3".to_string())));
    }

    #[test]
    fn test_launch_request_distributed_has_rank_table() {
        let env = env();
        let mut spec = spec();
        spec.target = DeploymentTarget::Distributed {
            rank_table_file: PathBuf::from("/srv/rank_table.json"),
        };

        let request =
            LaunchRequest::for_worker(&spec, &env, Path::new("sock/worker_0"), "resnet_v1_0");
        let joined = request.args.join(" ");
        assert!(joined.contains("--rank-table-file /srv/rank_table.json"));
        assert!(!joined.contains("--device-id"));
        assert!(request.envs.is_empty());
    }

    #[test]
    fn test_spawn_seq_is_monotonic() {
        let env = env();
        assert_eq!(env.next_seq(), 0);
        assert_eq!(env.next_seq(), 1);
        assert_eq!(env.next_seq(), 2);
    }

    #[test]
    fn test_dead_pid_is_not_alive() {
        // Spawn a process that exits immediately, then probe it. The pid may
        // linger as a zombie until reaped, so wait on it first.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let process = OsWorkerProcess::new(pid);
        assert!(!process.is_alive());
        // signalling a dead pid is a no-op, not an error
        assert!(process.send_signal(ExitSignalKind::Interrupt).is_ok());
    }
}
