//! Endpoint naming for the per-run unix sockets
//!
//! Socket names embed the owning process id so concurrent runs on one host
//! never collide, and worker names additionally embed a per-run index so two
//! workers with identical descriptive fields still get distinct addresses.

use crate::error::IpcError;
use std::path::{Path, PathBuf};

/// Maximum unix domain socket address length
pub const MAX_SOCKET_PATH_LEN: usize = 107;

/// Create the socket directory, tolerating pre-existence.
pub fn ensure_socket_dir(dir: &Path) -> Result<(), IpcError> {
    match std::fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(IpcError::IoError(e.to_string())),
    }
}

/// Address of the master registration socket for this run.
pub fn master_address(dir: &Path, master_pid: u32) -> Result<PathBuf, IpcError> {
    bounded(dir.join(format!("shepherd_master_{}", master_pid)))
}

/// Address of one worker's endpoint.
///
/// Embeds servable name, device, pid and the worker's index; the pid/index
/// pair guarantees uniqueness even when the descriptive fields collide.
pub fn worker_address(
    dir: &Path,
    servable_name: &str,
    device_id: u32,
    worker_pid: u32,
    index: usize,
) -> Result<PathBuf, IpcError> {
    bounded(dir.join(format!(
        "shepherd_worker_{}_device{}_{}_{}",
        servable_name, device_id, worker_pid, index
    )))
}

/// Truncate an over-long socket path to the transport limit, keeping both
/// ends so pid and index survive the cut.
fn bounded(path: PathBuf) -> Result<PathBuf, IpcError> {
    let raw = path.to_string_lossy().into_owned();
    if raw.len() <= MAX_SOCKET_PATH_LEN {
        return Ok(path);
    }

    let head: String = raw.chars().take(50).collect();
    let tail: String = raw
        .chars()
        .skip(raw.chars().count().saturating_sub(50))
        .collect();
    let shortened = format!("{}___{}", head, tail);

    if shortened.len() > MAX_SOCKET_PATH_LEN {
        return Err(IpcError::AddressTooLong(shortened));
    }
    Ok(PathBuf::from(shortened))
}
