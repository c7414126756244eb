//! Master orchestration
//!
//! [`Master::start_servables`] is the one entry point: it merges and
//! validates the servable configs, binds the registration endpoint, spawns
//! one worker per deployment unit, holds the readiness barrier and then
//! hands the workers to the health monitor. The returned [`ServingHandle`]
//! is how the caller waits for, or requests, the end of serving.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use shepherd_config::{merge_start_configs, ShepherdConfig};
use shepherd_ipc::endpoint;

use crate::error::SupervisorError;
use crate::exit::ExitFlag;
use crate::handle::WorkerHandle;
use crate::launcher::{
    ignore_child_exits, LaunchEnv, LaunchRequest, OsProcessLauncher, ProcessLauncher,
};
use crate::monitor::{HealthMonitor, MonitorOutcome};
use crate::registration::RegistrationServer;
use crate::shutdown::ShutdownCoordinator;
use crate::spec::WorkerSpec;
use crate::startup::StartupWatcher;

/// Top-level supervisor for one serving run
pub struct Master {
    config: ShepherdConfig,
    launcher: Arc<dyn ProcessLauncher>,
    exit: ExitFlag,
}

impl Master {
    /// Master spawning real OS processes
    pub fn new(config: ShepherdConfig) -> Self {
        Self::with_launcher(config, Arc::new(OsProcessLauncher))
    }

    /// Master with an injected launcher, used by tests
    pub fn with_launcher(config: ShepherdConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            config,
            launcher,
            exit: ExitFlag::new(),
        }
    }

    /// Shared stop flag; triggering it ends serving gracefully
    pub fn exit_flag(&self) -> ExitFlag {
        self.exit.clone()
    }

    /// Start every configured servable and wait for the batch to be ready.
    ///
    /// Returns only once all workers reported ready; any earlier fault tears
    /// down the partial batch and surfaces as an error.
    pub async fn start_servables(self) -> Result<ServingHandle, SupervisorError> {
        self.config.validate_all()?;
        let merged = merge_start_configs(self.config.servables.clone())?;
        let specs = WorkerSpec::expand(&merged);
        if specs.is_empty() {
            return Err(SupervisorError::StartupFault {
                reason: "no servables configured".to_string(),
            });
        }
        for spec in &specs {
            info!(worker = %spec.describe(), "Deploying servable");
        }

        // children are never waited on, let the kernel reap them
        ignore_child_exits()?;
        self.exit.install()?;

        let supervisor = &self.config.supervisor;
        let master_pid = std::process::id();
        let server = RegistrationServer::bind(&supervisor.socket_dir, master_pid).await?;
        let env = Arc::new(LaunchEnv::new(
            supervisor.worker_program.clone(),
            supervisor.worker_args.clone(),
            supervisor.socket_dir.clone(),
            server.address().to_path_buf(),
            master_pid,
        ));

        let handles = match self.spawn_all(&specs, &server, &env).await {
            Ok(handles) => handles,
            Err(e) => {
                server.shutdown();
                return Err(e);
            }
        };

        let shutdown = ShutdownCoordinator::new(supervisor);
        let mut handles = handles;
        if let Err(e) = StartupWatcher::new(supervisor)
            .wait_all_ready(&mut handles, &self.exit, &shutdown)
            .await
        {
            server.shutdown();
            return Err(e);
        }

        let worker_count = handles.len();
        let monitor = HealthMonitor::new(
            supervisor,
            Arc::clone(&self.launcher),
            Arc::clone(&env),
            self.exit.clone(),
        );
        let task = monitor.spawn(handles);

        Ok(ServingHandle {
            monitor: task,
            exit: self.exit,
            server,
            worker_count,
        })
    }

    async fn spawn_all(
        &self,
        specs: &[WorkerSpec],
        server: &RegistrationServer,
        env: &Arc<LaunchEnv>,
    ) -> Result<Vec<WorkerHandle>, SupervisorError> {
        let registry = server.registry();
        let mut per_servable: HashMap<(String, u64), usize> = HashMap::new();
        let mut handles: Vec<WorkerHandle> = Vec::new();

        for spec in specs {
            let slot = per_servable
                .entry((spec.servable_name.clone(), spec.version_number))
                .or_insert(0);
            let index = *slot;
            *slot += 1;

            let worker_key = format!("{}_v{}_{}", spec.servable_name, spec.version_number, index);
            let cell = registry.register(&worker_key);
            let address = endpoint::worker_address(
                &env.socket_dir,
                &spec.servable_name,
                spec.device_id().unwrap_or(0),
                env.master_pid,
                env.next_seq(),
            )?;
            let request = LaunchRequest::for_worker(spec, env, &address, &worker_key);

            match self.launcher.launch(&request).await {
                Ok(process) => {
                    info!(worker = %worker_key, pid = process.pid(), "Worker spawned");
                    handles.push(WorkerHandle::new(
                        spec.clone(),
                        worker_key,
                        index,
                        address,
                        process,
                        cell,
                    ));
                }
                Err(e) => {
                    // take the partial batch down before reporting
                    ShutdownCoordinator::new(&self.config.supervisor)
                        .shutdown_workers(&mut handles)
                        .await;
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }
}

/// A running serving session
pub struct ServingHandle {
    monitor: JoinHandle<MonitorOutcome>,
    exit: ExitFlag,
    server: RegistrationServer,
    worker_count: usize,
}

impl ServingHandle {
    /// Number of workers started for this run
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Shared stop flag for this run
    pub fn exit_flag(&self) -> ExitFlag {
        self.exit.clone()
    }

    /// Wait until serving ends; workers are already shut down on return.
    pub async fn wait(self) -> Result<(), SupervisorError> {
        let outcome = self.monitor.await.map_err(|e| SupervisorError::TerminalFault {
            reason: format!("supervision task failed: {}", e),
        })?;
        self.server.shutdown();
        match outcome {
            MonitorOutcome::Interrupted => Ok(()),
            MonitorOutcome::AllWorkersDead => Err(SupervisorError::TerminalFault {
                reason: "all worker processes have exited".to_string(),
            }),
        }
    }

    /// Request a graceful stop and wait for it to complete.
    pub async fn stop(self) -> Result<(), SupervisorError> {
        self.exit.trigger();
        self.wait().await
    }
}
