//! Single-instance coordination through a pid lock file.
//!
//! The lock file holds the daemon's pid. A second daemon refuses to start
//! while the recorded pid is alive; a stale file left by a crash is
//! overwritten silently.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Held for the lifetime of the daemon process. Released (unlinked) on
/// drop or via [`InstanceLock::release`].
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    released: bool,
}

impl InstanceLock {
    /// Acquire the lock at `path`, refusing if another live process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read lock file {}", path.display()))?;
            match contents.trim().parse::<u32>() {
                Ok(pid) if is_process_alive(pid) => {
                    bail!(
                        "Another taskd instance is running (PID {}, lock file {})",
                        pid,
                        path.display()
                    );
                }
                Ok(pid) => {
                    debug!(pid, path = %path.display(), "Overwriting stale lock file");
                }
                Err(_) => {
                    warn!(path = %path.display(), "Invalid lock file contents, overwriting");
                }
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, std::process::id().to_string())
            .with_context(|| format!("Failed to write lock file {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            released: false,
        })
    }

    /// Remove the lock file. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
            self.released = true;
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Signal-0 liveness probe.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        let Ok(pid_i32) = i32::try_from(pid) else {
            return false;
        };
        kill(Pid::from_raw(pid_i32), None).is_ok()
    }

    #[cfg(not(unix))]
    {
        use std::process::Command;
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|output| String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}
