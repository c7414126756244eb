//! Worker lifecycle supervision for the shepherd serving master
//!
//! The master builds one [`WorkerHandle`] per configured worker, spawns the
//! worker processes through an injected [`ProcessLauncher`], blocks on the
//! all-or-nothing startup barrier, then hands the handles to the background
//! [`HealthMonitor`] which restarts faulted workers under policy and tears
//! everything down through the [`ShutdownCoordinator`] when the run ends.

pub mod error;
pub mod exit;
pub mod handle;
pub mod launcher;
pub mod master;
pub mod monitor;
pub mod registration;
pub mod shutdown;
pub mod spec;
pub mod startup;
pub mod testing;

// Re-export main types
pub use error::SupervisorError;
pub use exit::ExitFlag;
pub use handle::{RestartPolicy, WorkerHandle, WorkerState};
pub use launcher::{
    ExitSignalKind, LaunchEnv, LaunchRequest, OsProcessLauncher, ProcessLauncher, WorkerProcess,
};
pub use master::{Master, ServingHandle};
pub use monitor::{HealthMonitor, MonitorOutcome};
pub use registration::{RegistrationServer, StatusRegistry, WorkerStatusCell};
pub use shutdown::ShutdownCoordinator;
pub use spec::{DeploymentTarget, WorkerSpec};
pub use startup::StartupWatcher;
