//! In-process fakes for supervision tests
//!
//! [`FakeLauncher`] stands in for the OS launcher so tests can script
//! process lifecycles deterministically: which spawns fail, which fake
//! workers obey an interrupt, and when a fake worker "dies".

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::SupervisorError;
use crate::launcher::{ExitSignalKind, LaunchRequest, ProcessLauncher, WorkerProcess};

/// Scriptable state backing one fake worker process
#[derive(Debug)]
pub struct FakeWorkerState {
    alive: AtomicBool,
    signals: Mutex<Vec<ExitSignalKind>>,
    obeys_interrupt: AtomicBool,
}

impl FakeWorkerState {
    pub fn alive(alive: bool) -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(alive),
            signals: Mutex::new(Vec::new()),
            obeys_interrupt: AtomicBool::new(true),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Script a death or resurrection from the test
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Make the fake ignore SIGINT so only SIGKILL ends it
    pub fn set_obeys_interrupt(&self, obeys: bool) {
        self.obeys_interrupt.store(obeys, Ordering::SeqCst);
    }

    /// Signals delivered so far, in order
    pub fn signals(&self) -> Vec<ExitSignalKind> {
        self.signals.lock().expect("fake state lock poisoned").clone()
    }

    fn receive(&self, kind: ExitSignalKind) {
        self.signals
            .lock()
            .expect("fake state lock poisoned")
            .push(kind);
        match kind {
            ExitSignalKind::Interrupt => {
                if self.obeys_interrupt.load(Ordering::SeqCst) {
                    self.alive.store(false, Ordering::SeqCst);
                }
            }
            ExitSignalKind::Kill => self.alive.store(false, Ordering::SeqCst),
        }
    }
}

/// Fake worker process driven by a shared [`FakeWorkerState`]
#[derive(Debug)]
pub struct FakeWorkerProcess {
    pid: u32,
    state: Arc<FakeWorkerState>,
}

impl FakeWorkerProcess {
    pub fn new(pid: u32, state: Arc<FakeWorkerState>) -> Self {
        Self { pid, state }
    }
}

impl WorkerProcess for FakeWorkerProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    fn send_signal(&self, kind: ExitSignalKind) -> Result<(), SupervisorError> {
        self.state.receive(kind);
        Ok(())
    }
}

/// Launcher that hands out fake processes and records every request
#[derive(Debug)]
pub struct FakeLauncher {
    states: Mutex<Vec<Arc<FakeWorkerState>>>,
    requests: Mutex<Vec<LaunchRequest>>,
    failing_spawns: Mutex<HashSet<usize>>,
    obeys_interrupt: AtomicBool,
    next_pid: AtomicU32,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            failing_spawns: Mutex::new(HashSet::new()),
            obeys_interrupt: AtomicBool::new(true),
            next_pid: AtomicU32::new(1000),
        }
    }

    /// Make all future fakes ignore SIGINT
    pub fn ignore_interrupts(&self) {
        self.obeys_interrupt.store(false, Ordering::SeqCst);
    }

    /// Fail the nth spawn (zero-based, counted across the whole run)
    pub fn fail_spawn(&self, index: usize) {
        self.failing_spawns
            .lock()
            .expect("fake launcher lock poisoned")
            .insert(index);
    }

    pub fn spawn_count(&self) -> usize {
        self.requests
            .lock()
            .expect("fake launcher lock poisoned")
            .len()
    }

    /// All launch requests seen so far, in spawn order
    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.requests
            .lock()
            .expect("fake launcher lock poisoned")
            .clone()
    }

    /// States of all fakes handed out so far, in spawn order
    pub fn states(&self) -> Vec<Arc<FakeWorkerState>> {
        self.states
            .lock()
            .expect("fake launcher lock poisoned")
            .clone()
    }

    /// State of the nth spawned fake
    pub fn state(&self, index: usize) -> Arc<FakeWorkerState> {
        Arc::clone(
            &self
                .states
                .lock()
                .expect("fake launcher lock poisoned")[index],
        )
    }

    pub fn alive_count(&self) -> usize {
        self.states
            .lock()
            .expect("fake launcher lock poisoned")
            .iter()
            .filter(|s| s.is_alive())
            .count()
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn WorkerProcess>, SupervisorError> {
        let index = {
            let mut requests = self.requests.lock().expect("fake launcher lock poisoned");
            requests.push(request.clone());
            requests.len() - 1
        };

        if self
            .failing_spawns
            .lock()
            .expect("fake launcher lock poisoned")
            .contains(&index)
        {
            return Err(SupervisorError::Spawn {
                worker: request.program.to_string_lossy().into_owned(),
                reason: "scripted spawn failure".to_string(),
            });
        }

        let state = FakeWorkerState::alive(true);
        state.set_obeys_interrupt(self.obeys_interrupt.load(Ordering::SeqCst));
        self.states
            .lock()
            .expect("fake launcher lock poisoned")
            .push(Arc::clone(&state));

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeWorkerProcess::new(pid, state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request() -> LaunchRequest {
        LaunchRequest {
            program: PathBuf::from("/bin/worker"),
            args: vec![],
            envs: vec![],
        }
    }

    #[tokio::test]
    async fn test_scripted_spawn_failure() {
        let launcher = FakeLauncher::new();
        launcher.fail_spawn(1);

        assert!(launcher.launch(&request()).await.is_ok());
        assert!(launcher.launch(&request()).await.is_err());
        assert!(launcher.launch(&request()).await.is_ok());
        assert_eq!(launcher.spawn_count(), 3);
        assert_eq!(launcher.states().len(), 2);
    }

    #[tokio::test]
    async fn test_interrupt_obedience_is_scriptable() {
        let launcher = FakeLauncher::new();
        launcher.ignore_interrupts();
        let process = launcher.launch(&request()).await.unwrap();

        process.send_signal(ExitSignalKind::Interrupt).unwrap();
        assert!(process.is_alive());
        process.send_signal(ExitSignalKind::Kill).unwrap();
        assert!(!process.is_alive());
        assert_eq!(
            launcher.state(0).signals(),
            vec![ExitSignalKind::Interrupt, ExitSignalKind::Kill]
        );
    }
}
