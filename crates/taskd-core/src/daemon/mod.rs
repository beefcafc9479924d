//! Process-level lifecycle: single-instance locking and daemon status.

mod lock;

pub use lock::{is_process_alive, InstanceLock};

use anyhow::Result;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Running { pid: u32 },
    NotRunning,
    Stale { pid: u32 },
}

/// Inspect the lock file without acquiring it. A dead recorded pid is
/// reported as stale; the next acquire will overwrite it.
pub fn check_status(lock_path: &Path) -> Result<DaemonStatus> {
    if !lock_path.exists() {
        return Ok(DaemonStatus::NotRunning);
    }

    let contents = std::fs::read_to_string(lock_path)?;
    let pid: u32 = match contents.trim().parse() {
        Ok(pid) => pid,
        Err(_) => return Ok(DaemonStatus::NotRunning),
    };

    if is_process_alive(pid) {
        Ok(DaemonStatus::Running { pid })
    } else {
        Ok(DaemonStatus::Stale { pid })
    }
}
