//! Continuous worker health supervision
//!
//! After the startup barrier opens, the monitor owns the worker handles and
//! polls them on a short tick. Fault exits are restarted within the policy
//! budget, requested exits are recorded, and the loop ends when a signal
//! arrives or no worker is left alive. Either way it runs the full shutdown
//! sequence before reporting its outcome.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use shepherd_config::SupervisorConfig;

use crate::exit::ExitFlag;
use crate::handle::{RestartPolicy, WorkerHandle, WorkerState};
use crate::launcher::{LaunchEnv, ProcessLauncher};
use crate::shutdown::ShutdownCoordinator;

/// Why the supervision loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// A stop signal was received
    Interrupted,
    /// Every worker exited and none could be restarted
    AllWorkersDead,
}

/// Health supervision loop over a set of worker handles
pub struct HealthMonitor {
    tick: std::time::Duration,
    policy: RestartPolicy,
    launcher: Arc<dyn ProcessLauncher>,
    env: Arc<LaunchEnv>,
    exit: ExitFlag,
    shutdown: ShutdownCoordinator,
}

impl HealthMonitor {
    pub fn new(
        config: &SupervisorConfig,
        launcher: Arc<dyn ProcessLauncher>,
        env: Arc<LaunchEnv>,
        exit: ExitFlag,
    ) -> Self {
        Self {
            tick: config.monitor_tick,
            policy: RestartPolicy::from(config),
            launcher,
            env,
            exit,
            shutdown: ShutdownCoordinator::new(config),
        }
    }

    /// Take ownership of the handles and supervise them on a background task
    pub fn spawn(self, handles: Vec<WorkerHandle>) -> JoinHandle<MonitorOutcome> {
        tokio::spawn(self.run(handles))
    }

    async fn run(self, mut handles: Vec<WorkerHandle>) -> MonitorOutcome {
        let outcome = self.watch(&mut handles).await;
        match outcome {
            MonitorOutcome::Interrupted => info!("Stop requested, shutting down workers"),
            MonitorOutcome::AllWorkersDead => error!("All workers have exited"),
        }
        self.shutdown.shutdown_workers(&mut handles).await;
        // wake anything blocked on the exit flag, e.g. after worker loss
        self.exit.trigger();
        outcome
    }

    async fn watch(&self, handles: &mut [WorkerHandle]) -> MonitorOutcome {
        loop {
            if self.exit.is_stopped() {
                return MonitorOutcome::Interrupted;
            }

            let mut alive = 0usize;
            for handle in handles.iter_mut() {
                if self.check_worker(handle).await {
                    alive += 1;
                }
            }

            if alive == 0 {
                return MonitorOutcome::AllWorkersDead;
            }
            sleep(self.tick).await;
        }
    }

    /// One tick of supervision for one worker; true while it counts as alive
    async fn check_worker(&self, handle: &mut WorkerHandle) -> bool {
        if handle.is_in_process_switching() {
            return true;
        }

        if handle.is_alive() {
            if handle.is_unavailable() {
                warn!(worker = %handle.worker_key, "Worker reported unavailable");
                return self.try_restart(handle).await;
            }
            return true;
        }

        match handle.state() {
            WorkerState::Dead | WorkerState::Faulted => false,
            _ if !handle.is_fault_exit() => {
                info!(worker = %handle.worker_key, "Worker exited as requested");
                handle.set_state(WorkerState::Dead);
                false
            }
            _ => {
                warn!(worker = %handle.worker_key, pid = handle.pid(),
                    "Worker exited unexpectedly");
                self.try_restart(handle).await
            }
        }
    }

    async fn try_restart(&self, handle: &mut WorkerHandle) -> bool {
        if !handle.can_be_restarted(&self.policy) {
            if self.policy.restart_on_fault {
                error!(worker = %handle.worker_key, attempts = handle.restart_count(),
                    "Worker fault, restart budget exhausted");
            } else {
                error!(worker = %handle.worker_key, "Worker fault, restarts disabled");
            }
            handle.set_state(WorkerState::Faulted);
            return false;
        }
        if handle.restart(self.launcher.as_ref(), &self.env).await.is_ok() {
            return true;
        }
        // A failed relaunch leaves the previous process attached; if it is
        // still running it stays in the alive count until it actually exits.
        handle.is_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::ExitSignalKind;
    use crate::registration::WorkerStatusCell;
    use crate::spec::{DeploymentTarget, WorkerSpec};
    use crate::testing::FakeLauncher;
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_config(max_restarts: u32, restart_on_fault: bool) -> SupervisorConfig {
        SupervisorConfig {
            monitor_tick: Duration::from_millis(5),
            shutdown_wait: Duration::from_millis(100),
            shutdown_poll_interval: Duration::from_millis(5),
            restart_on_fault,
            max_restart_attempts: max_restarts,
            ..Default::default()
        }
    }

    fn test_env() -> Arc<LaunchEnv> {
        Arc::new(LaunchEnv::new(
            PathBuf::from("/bin/worker"),
            vec![],
            PathBuf::from("sock"),
            PathBuf::from("sock/shepherd_master_1"),
            1,
        ))
    }

    async fn spawn_handle(
        launcher: &FakeLauncher,
        env: &LaunchEnv,
        key: &str,
        cell: Arc<WorkerStatusCell>,
    ) -> WorkerHandle {
        let spec = WorkerSpec {
            servable_directory: PathBuf::from("/servables"),
            servable_name: "resnet".to_string(),
            version_number: 1,
            target: DeploymentTarget::Device {
                device_type: "cpu".to_string(),
                device_id: 0,
            },
            dec_key_file: None,
            dec_mode: None,
            listening_master: true,
        };
        let request = crate::launcher::LaunchRequest::for_worker(
            &spec,
            env,
            &PathBuf::from("sock/worker"),
            key,
        );
        let process = launcher.launch(&request).await.unwrap();
        let mut handle = WorkerHandle::new(
            spec,
            key.to_string(),
            0,
            PathBuf::from("sock/worker"),
            process,
            cell,
        );
        handle.set_state(WorkerState::Ready);
        handle
    }

    fn fresh_cell() -> Arc<WorkerStatusCell> {
        Arc::new(WorkerStatusCell::default())
    }

    #[tokio::test]
    async fn test_fault_exit_triggers_restart() {
        let launcher = Arc::new(FakeLauncher::new());
        let env = test_env();
        let handle = spawn_handle(&launcher, &env, "resnet_v1_0", fresh_cell()).await;
        let exit = ExitFlag::new();

        let monitor = HealthMonitor::new(
            &test_config(3, true),
            Arc::clone(&launcher) as Arc<dyn ProcessLauncher>,
            Arc::clone(&env),
            exit.clone(),
        );
        let task = monitor.spawn(vec![handle]);

        // kill the first process; the monitor should bring up a second
        launcher.state(0).set_alive(false);
        for _ in 0..100 {
            if launcher.spawn_count() == 2 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(launcher.spawn_count(), 2);
        assert!(launcher.state(1).is_alive());

        exit.trigger();
        assert_eq!(task.await.unwrap(), MonitorOutcome::Interrupted);
        assert_eq!(launcher.alive_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_worker_is_replaced() {
        let launcher = Arc::new(FakeLauncher::new());
        let env = test_env();
        let cell = fresh_cell();
        let handle = spawn_handle(&launcher, &env, "resnet_v1_0", Arc::clone(&cell)).await;
        let exit = ExitFlag::new();

        let monitor = HealthMonitor::new(
            &test_config(3, true),
            Arc::clone(&launcher) as Arc<dyn ProcessLauncher>,
            Arc::clone(&env),
            exit.clone(),
        );
        let task = monitor.spawn(vec![handle]);

        cell.mark_unavailable();
        for _ in 0..100 {
            if launcher.spawn_count() == 2 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(launcher.spawn_count(), 2);
        // the replacement starts from a clean status
        assert!(!cell.is_unavailable());

        exit.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_relaunch_keeps_live_worker_counted() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.ignore_interrupts();
        launcher.fail_spawn(1);
        let env = test_env();
        let cell = fresh_cell();
        let handle = spawn_handle(&launcher, &env, "resnet_v1_0", Arc::clone(&cell)).await;
        let exit = ExitFlag::new();

        let monitor = HealthMonitor::new(
            &test_config(3, true),
            Arc::clone(&launcher) as Arc<dyn ProcessLauncher>,
            Arc::clone(&env),
            exit.clone(),
        );
        let task = monitor.spawn(vec![handle]);

        // the replacement spawn fails, but the interrupt-ignoring old
        // process is still running and must keep the run alive
        cell.mark_unavailable();
        for _ in 0..100 {
            if launcher.spawn_count() == 2 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(launcher.spawn_count(), 2);
        sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        assert!(launcher.state(0).is_alive());

        exit.trigger();
        assert_eq!(task.await.unwrap(), MonitorOutcome::Interrupted);
        assert_eq!(launcher.alive_count(), 0);
    }

    #[tokio::test]
    async fn test_requested_exit_is_not_restarted() {
        let launcher = Arc::new(FakeLauncher::new());
        let env = test_env();
        let mut handle = spawn_handle(&launcher, &env, "resnet_v1_0", fresh_cell()).await;
        handle.send_exit_signal(ExitSignalKind::Interrupt);
        let exit = ExitFlag::new();

        let monitor = HealthMonitor::new(
            &test_config(3, true),
            Arc::clone(&launcher) as Arc<dyn ProcessLauncher>,
            Arc::clone(&env),
            exit.clone(),
        );
        let task = monitor.spawn(vec![handle]);

        assert_eq!(task.await.unwrap(), MonitorOutcome::AllWorkersDead);
        assert_eq!(launcher.spawn_count(), 1);
        assert!(exit.is_stopped());
    }

    #[tokio::test]
    async fn test_restart_budget_exhaustion_ends_supervision() {
        let launcher = Arc::new(FakeLauncher::new());
        let env = test_env();
        let handle = spawn_handle(&launcher, &env, "resnet_v1_0", fresh_cell()).await;
        let exit = ExitFlag::new();

        let monitor = HealthMonitor::new(
            &test_config(1, true),
            Arc::clone(&launcher) as Arc<dyn ProcessLauncher>,
            Arc::clone(&env),
            exit.clone(),
        );
        let task = monitor.spawn(vec![handle]);

        // first death consumes the only restart, second death is terminal
        launcher.state(0).set_alive(false);
        for _ in 0..100 {
            if launcher.spawn_count() == 2 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        launcher.state(1).set_alive(false);

        assert_eq!(task.await.unwrap(), MonitorOutcome::AllWorkersDead);
        assert_eq!(launcher.spawn_count(), 2);
        assert!(exit.is_stopped());
    }

    #[tokio::test]
    async fn test_restarts_disabled_means_terminal_fault() {
        let launcher = Arc::new(FakeLauncher::new());
        let env = test_env();
        let handle = spawn_handle(&launcher, &env, "resnet_v1_0", fresh_cell()).await;
        let exit = ExitFlag::new();

        let monitor = HealthMonitor::new(
            &test_config(3, false),
            Arc::clone(&launcher) as Arc<dyn ProcessLauncher>,
            Arc::clone(&env),
            exit.clone(),
        );
        let task = monitor.spawn(vec![handle]);

        launcher.state(0).set_alive(false);
        assert_eq!(task.await.unwrap(), MonitorOutcome::AllWorkersDead);
        assert_eq!(launcher.spawn_count(), 1);
    }
}
