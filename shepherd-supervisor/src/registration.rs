//! Master registration endpoint
//!
//! Workers connect to a per-run unix socket named with the master pid and
//! report ready/heartbeat/unavailable/error. Messages are routed to one
//! status cell per worker; supervision loops read the cells, never the
//! socket. A worker that never connects leaves its cell untouched, and an
//! abnormal disconnect only ends that worker's connection task — faults are
//! detected through process liveness.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use shepherd_ipc::endpoint;
use shepherd_ipc::{IpcError, RegistrationMessage, RegistrationStream};

use crate::error::SupervisorError;

/// Observed status of one worker, written by the registration endpoint and
/// read by the supervision loops.
#[derive(Debug, Default)]
pub struct WorkerStatusCell {
    ready: AtomicBool,
    unavailable: AtomicBool,
    error: Mutex<Option<String>>,
    last_heartbeat: Mutex<Option<Instant>>,
}

impl WorkerStatusCell {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().expect("status cell lock poisoned").clone()
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        *self.last_heartbeat.lock().expect("status cell lock poisoned")
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn mark_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    pub fn record_error(&self, message: String) {
        let mut slot = self.error.lock().expect("status cell lock poisoned");
        // keep the first report, it names the root cause
        slot.get_or_insert(message);
    }

    pub fn record_heartbeat(&self) {
        *self.last_heartbeat.lock().expect("status cell lock poisoned") = Some(Instant::now());
    }

    /// Clear transient state when the worker process is replaced
    pub fn reset(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.unavailable.store(false, Ordering::SeqCst);
        *self.error.lock().expect("status cell lock poisoned") = None;
        *self.last_heartbeat.lock().expect("status cell lock poisoned") = None;
    }
}

/// worker_key -> status cell map shared with the accept loop
#[derive(Debug, Default)]
pub struct StatusRegistry {
    cells: Mutex<HashMap<String, Arc<WorkerStatusCell>>>,
}

impl StatusRegistry {
    /// Register a worker and return its cell
    pub fn register(&self, worker_key: &str) -> Arc<WorkerStatusCell> {
        let cell = Arc::new(WorkerStatusCell::default());
        self.cells
            .lock()
            .expect("registry lock poisoned")
            .insert(worker_key.to_string(), Arc::clone(&cell));
        cell
    }

    pub fn lookup(&self, worker_key: &str) -> Option<Arc<WorkerStatusCell>> {
        self.cells
            .lock()
            .expect("registry lock poisoned")
            .get(worker_key)
            .cloned()
    }

    pub fn remove(&self, worker_key: &str) {
        self.cells
            .lock()
            .expect("registry lock poisoned")
            .remove(worker_key);
    }

    fn apply(&self, message: RegistrationMessage) {
        let Some(cell) = self.lookup(message.worker_key()) else {
            warn!(worker = message.worker_key(), "Registration message for unknown worker");
            return;
        };
        match message {
            RegistrationMessage::Ready { worker_key } => {
                debug!(worker = %worker_key, "Worker reported ready");
                cell.mark_ready();
            }
            RegistrationMessage::Heartbeat { .. } => {
                cell.record_heartbeat();
            }
            RegistrationMessage::Unavailable { worker_key, reason } => {
                warn!(worker = %worker_key, reason = reason.as_deref().unwrap_or("unspecified"),
                    "Worker reported unavailable");
                cell.mark_unavailable();
            }
            RegistrationMessage::Error { worker_key, message } => {
                warn!(worker = %worker_key, error = %message, "Worker reported fatal error");
                cell.record_error(message);
            }
        }
    }
}

/// Listening registration endpoint for one master run
pub struct RegistrationServer {
    address: PathBuf,
    registry: Arc<StatusRegistry>,
    accept_task: JoinHandle<()>,
}

impl RegistrationServer {
    /// Bind the per-run master socket and start accepting workers
    pub async fn bind(socket_dir: &Path, master_pid: u32) -> Result<Self, SupervisorError> {
        endpoint::ensure_socket_dir(socket_dir)?;
        let address = endpoint::master_address(socket_dir, master_pid)?;

        // a stale socket from a crashed run with the same pid would block bind
        if address.exists() {
            let _ = std::fs::remove_file(&address);
        }

        let listener = UnixListener::bind(&address).map_err(|e| {
            SupervisorError::Ipc(IpcError::IoError(format!(
                "failed to bind {}: {}",
                address.display(),
                e
            )))
        })?;

        let registry = Arc::new(StatusRegistry::default());
        let accept_registry = Arc::clone(&registry);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let registry = Arc::clone(&accept_registry);
                        tokio::spawn(handle_connection(stream, registry));
                    }
                    Err(e) => {
                        warn!(error = %e, "Registration accept failed");
                    }
                }
            }
        });

        debug!(address = %address.display(), "Registration endpoint listening");
        Ok(Self {
            address,
            registry,
            accept_task,
        })
    }

    pub fn address(&self) -> &Path {
        &self.address
    }

    pub fn registry(&self) -> Arc<StatusRegistry> {
        Arc::clone(&self.registry)
    }

    /// Stop accepting and remove the socket file
    pub fn shutdown(self) {
        self.accept_task.abort();
        let _ = std::fs::remove_file(&self.address);
    }
}

async fn handle_connection(stream: UnixStream, registry: Arc<StatusRegistry>) {
    let mut stream = RegistrationStream::new(stream);
    loop {
        match stream.receive::<RegistrationMessage>().await {
            Ok(envelope) => registry.apply(envelope.message),
            Err(IpcError::ConnectionClosed) => break,
            Err(IpcError::DeserializationError(e)) => {
                // line already consumed, keep the connection
                warn!(error = %e, "Undecodable registration message");
            }
            Err(e) => {
                warn!(error = %e, "Registration connection failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_ipc::RegistrationClient;
    use std::time::Duration;

    async fn wait_until(mut probe: impl FnMut() -> bool) {
        for _ in 0..200 {
            if probe() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_ready_message_marks_cell() {
        let tmp = tempfile::tempdir().unwrap();
        let server = RegistrationServer::bind(tmp.path(), 4242).await.unwrap();
        let cell = server.registry().register("resnet_v1_0");

        let mut client = RegistrationClient::connect(server.address()).await.unwrap();
        client
            .report(RegistrationMessage::Ready {
                worker_key: "resnet_v1_0".to_string(),
            })
            .await
            .unwrap();

        wait_until(|| cell.is_ready()).await;
        assert!(cell.error().is_none());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_error_keeps_first_report() {
        let tmp = tempfile::tempdir().unwrap();
        let server = RegistrationServer::bind(tmp.path(), 4243).await.unwrap();
        let cell = server.registry().register("add_v1_0");

        let mut client = RegistrationClient::connect(server.address()).await.unwrap();
        client
            .report(RegistrationMessage::Error {
                worker_key: "add_v1_0".to_string(),
                message: "device init failed".to_string(),
            })
            .await
            .unwrap();
        client
            .report(RegistrationMessage::Error {
                worker_key: "add_v1_0".to_string(),
                message: "follow-up".to_string(),
            })
            .await
            .unwrap();

        wait_until(|| cell.error().is_some()).await;
        // allow the second message to land before asserting
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cell.error().as_deref(), Some("device init failed"));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_worker_is_tolerated() {
        let tmp = tempfile::tempdir().unwrap();
        let server = RegistrationServer::bind(tmp.path(), 4244).await.unwrap();
        let cell = server.registry().register("known_v1_0");

        let mut client = RegistrationClient::connect(server.address()).await.unwrap();
        client
            .report(RegistrationMessage::Ready {
                worker_key: "stranger_v1_0".to_string(),
            })
            .await
            .unwrap();
        client
            .report(RegistrationMessage::Ready {
                worker_key: "known_v1_0".to_string(),
            })
            .await
            .unwrap();

        wait_until(|| cell.is_ready()).await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_abnormal_disconnect_is_tolerated() {
        let tmp = tempfile::tempdir().unwrap();
        let server = RegistrationServer::bind(tmp.path(), 4245).await.unwrap();
        let cell = server.registry().register("resnet_v1_0");

        let client = RegistrationClient::connect(server.address()).await.unwrap();
        drop(client);

        // endpoint must keep serving later connections
        let mut second = RegistrationClient::connect(server.address()).await.unwrap();
        second
            .report(RegistrationMessage::Ready {
                worker_key: "resnet_v1_0".to_string(),
            })
            .await
            .unwrap();

        wait_until(|| cell.is_ready()).await;
        server.shutdown();
    }

    #[test]
    fn test_cell_reset_clears_transients() {
        let cell = WorkerStatusCell::default();
        cell.mark_ready();
        cell.mark_unavailable();
        cell.record_error("boom".to_string());
        cell.record_heartbeat();

        cell.reset();
        assert!(!cell.is_ready());
        assert!(!cell.is_unavailable());
        assert!(cell.error().is_none());
        assert!(cell.last_heartbeat().is_none());
    }
}
