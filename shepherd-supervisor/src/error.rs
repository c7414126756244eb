//! Supervision error types

use shepherd_config::ConfigError;
use shepherd_ipc::IpcError;
use thiserror::Error;

/// Supervision errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Malformed or conflicting configuration, rejected before any spawn
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A worker process could not be created
    #[error("Failed to spawn worker {worker}: {reason}")]
    Spawn { worker: String, reason: String },

    /// A worker died or reported an error before the batch became ready
    #[error("Failed to start workers: {reason}")]
    StartupFault { reason: String },

    /// Every worker is dead and none may be restarted, or the run was ended
    /// by a fatal condition
    #[error("Serving terminated: {reason}")]
    TerminalFault { reason: String },

    /// Registration endpoint failure
    #[error("Registration endpoint error: {0}")]
    Ipc(#[from] IpcError),

    /// Signal handler installation failure
    #[error("Signal handling error: {0}")]
    Signal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
