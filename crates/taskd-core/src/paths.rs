use anyhow::Result;
use std::path::PathBuf;

const TASKD_DIR: &str = ".taskd";
const DB_FILE: &str = "taskd.db";
const LOCK_FILE: &str = "taskd.lock";
const LOGS_DIR: &str = "logs";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Resolve the taskd data directory.
/// Priority: DATA_DIR env var > ~/.taskd/
pub fn resolve_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::home_dir()
        .map(|h| h.join(TASKD_DIR))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))
}

/// Ensure the data directory exists and return its path.
pub fn ensure_data_dir() -> Result<PathBuf> {
    let dir = resolve_data_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Get the database path: <data_dir>/taskd.db
pub fn database_path() -> Result<PathBuf> {
    Ok(ensure_data_dir()?.join(DB_FILE))
}

/// Get the single-instance lock file path: <data_dir>/taskd.lock
pub fn lock_path() -> Result<PathBuf> {
    Ok(ensure_data_dir()?.join(LOCK_FILE))
}

/// Get the logs directory: <data_dir>/logs/
pub fn logs_dir() -> Result<PathBuf> {
    let dir = ensure_data_dir()?.join(LOGS_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
