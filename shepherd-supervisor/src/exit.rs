//! Process-wide exit state
//!
//! A single `running -> stopping` flag shared by every polling loop. It is
//! set exactly once, either by an OS termination signal or programmatically,
//! and never reset within a process lifetime. Loops observe it cooperatively
//! at each iteration boundary instead of being interrupted mid-operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::warn;

use crate::error::SupervisorError;

/// Shared exit flag, injected at construction into every loop that must
/// observe shutdown.
#[derive(Debug, Clone, Default)]
pub struct ExitFlag {
    stopped: Arc<AtomicBool>,
}

impl ExitFlag {
    /// Create a flag in the running state
    pub fn new() -> Self {
        Self::default()
    }

    /// Install SIGINT/SIGTERM listeners that trip the flag.
    ///
    /// Must be called from within a tokio runtime. Subsequent signals after
    /// the first are harmless; the flag only ever moves false -> true.
    pub fn install(&self) -> Result<(), SupervisorError> {
        for kind in [SignalKind::interrupt(), SignalKind::terminate()] {
            let mut listener =
                signal(kind).map_err(|e| SupervisorError::Signal(e.to_string()))?;
            let flag = self.clone();
            tokio::spawn(async move {
                if listener.recv().await.is_some() {
                    warn!("Received termination signal, beginning shutdown");
                    flag.trigger();
                }
            });
        }
        Ok(())
    }

    /// Whether a stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Trip the flag programmatically
    pub fn trigger(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
