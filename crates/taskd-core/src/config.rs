//! Daemon configuration from environment variables, plus the project path
//! guard applied to per-task working directory overrides.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Longest accepted project path, in characters.
const MAX_PROJECT_PATH_LEN: usize = 500;

/// Path prefixes a task may never use as its working directory.
const FORBIDDEN_PREFIXES: [&str; 4] = ["/etc", "/var/log", "/proc", "/sys"];

#[derive(Debug, Clone)]
pub struct Config {
    /// How often the scheduler polls for eligible tasks.
    pub poll_interval: Duration,
    /// Overall budget for one task execution.
    pub task_timeout: Duration,
    /// Budget for a single prompt/response iteration.
    pub iteration_timeout: Duration,
    /// How long an in-flight task may keep running after a stop signal.
    pub shutdown_timeout: Duration,
    /// Default working directory when a task carries no project_path.
    pub workspace: PathBuf,
    /// Directory holding the database and lock file.
    pub data_dir: PathBuf,
    /// Logical agent name passed to the runner.
    pub agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5_000),
            task_timeout: Duration::from_millis(1_800_000),
            iteration_timeout: Duration::from_millis(600_000),
            shutdown_timeout: Duration::from_millis(60_000),
            workspace: PathBuf::from("."),
            data_dir: PathBuf::from("."),
            agent: "default".to_string(),
        }
    }
}

impl Config {
    /// Build a configuration from the process environment.
    ///
    /// Unset variables fall back to defaults; unparsable numeric values are
    /// logged and also fall back rather than aborting startup.
    pub fn from_env() -> Result<Self> {
        let workspace = match std::env::var("WORKSPACE") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => std::env::current_dir()?,
        };
        let data_dir = crate::paths::ensure_data_dir()?;
        let agent = std::env::var("AGENT").unwrap_or_else(|_| "default".to_string());

        Ok(Self {
            poll_interval: env_duration_ms("POLL_INTERVAL_MS", 5_000),
            task_timeout: env_duration_ms("TASK_TIMEOUT_MS", 1_800_000),
            iteration_timeout: env_duration_ms("ITERATION_TIMEOUT_MS", 600_000),
            shutdown_timeout: env_duration_ms("SHUTDOWN_TIMEOUT_MS", 60_000),
            workspace,
            data_dir,
            agent,
        })
    }

    /// Working directory for a task: its validated project_path override, or
    /// the configured workspace.
    pub fn work_dir_for(&self, project_path: Option<&str>) -> PathBuf {
        match project_path {
            Some(path) => PathBuf::from(path),
            None => self.workspace.clone(),
        }
    }
}

fn env_duration_ms(name: &str, default_ms: u64) -> Duration {
    let ms = match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, "Ignoring unparsable duration, using default");
                default_ms
            }
        },
        Err(_) => default_ms,
    };
    Duration::from_millis(ms)
}

/// Reject project paths that could escape the workspace or point the agent
/// at system directories.
pub fn validate_project_path(path: &str) -> Result<()> {
    if path.chars().count() > MAX_PROJECT_PATH_LEN {
        bail!("Project path exceeds {} characters", MAX_PROJECT_PATH_LEN);
    }
    if path.contains("..") {
        bail!("Project path must not contain '..'");
    }
    for prefix in FORBIDDEN_PREFIXES {
        if path.starts_with(prefix) {
            bail!("Project path under {} is not allowed", prefix);
        }
    }
    if path.starts_with("/root") && !path.starts_with("/root/projects") {
        bail!("Project path under /root is not allowed (except /root/projects)");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_guard_rejects_traversal() {
        assert!(validate_project_path("../etc/passwd").is_err());
        assert!(validate_project_path("/home/user/../../etc").is_err());
    }

    #[test]
    fn path_guard_rejects_system_dirs() {
        assert!(validate_project_path("/etc/nginx").is_err());
        assert!(validate_project_path("/var/log/syslog").is_err());
        assert!(validate_project_path("/proc/1").is_err());
        assert!(validate_project_path("/sys/kernel").is_err());
        assert!(validate_project_path("/root/other").is_err());
    }

    #[test]
    fn path_guard_allows_project_dirs() {
        assert!(validate_project_path("/home/user/code").is_ok());
        assert!(validate_project_path("/root/projects/foo").is_ok());
        assert!(validate_project_path("relative/dir").is_ok());
    }

    #[test]
    fn path_guard_rejects_overlong_paths() {
        let long = format!("/home/{}", "a".repeat(MAX_PROJECT_PATH_LEN));
        assert!(validate_project_path(&long).is_err());
    }

    #[test]
    fn work_dir_prefers_project_path() {
        let config = Config::default();
        assert_eq!(
            config.work_dir_for(Some("/home/user/proj")),
            PathBuf::from("/home/user/proj")
        );
        assert_eq!(config.work_dir_for(None), config.workspace);
    }
}
