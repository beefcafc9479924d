//! SQLite DDL and forward-only migrations for the task store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

/// Complete DDL for the task database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Tasks: the single durable entity.
CREATE TABLE IF NOT EXISTS tasks (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    prompt                TEXT NOT NULL,
    project_path          TEXT,
    status                TEXT NOT NULL DEFAULT 'pending',
    priority              TEXT NOT NULL DEFAULT 'medium',
    result                TEXT,
    error                 TEXT,
    error_type            TEXT,
    session_id            TEXT,
    iteration             INTEGER NOT NULL DEFAULT 0,
    max_iterations        INTEGER NOT NULL DEFAULT 10,
    retry_count           INTEGER NOT NULL DEFAULT 0,
    max_retries           INTEGER NOT NULL DEFAULT 3,
    retry_after           INTEGER,
    created_at            INTEGER NOT NULL,
    started_at            INTEGER,
    completed_at          INTEGER,
    created_by            TEXT NOT NULL DEFAULT 'unknown',
    source                TEXT NOT NULL DEFAULT 'cli'
);

CREATE INDEX IF NOT EXISTS idx_tasks_status      ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_priority    ON tasks(priority);
CREATE INDEX IF NOT EXISTS idx_tasks_retry_after ON tasks(retry_after);
"#;

/// Columns added after the initial release. Applied one at a time so a
/// database created by any earlier version upgrades in place.
const MIGRATIONS: [&str; 5] = [
    "ALTER TABLE tasks ADD COLUMN depends_on INTEGER",
    "ALTER TABLE tasks ADD COLUMN progress_tool_calls INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE tasks ADD COLUMN progress_last_tool TEXT",
    "ALTER TABLE tasks ADD COLUMN progress_last_message TEXT",
    "ALTER TABLE tasks ADD COLUMN progress_updated_at INTEGER",
];

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times: base DDL uses `IF NOT EXISTS` and column
/// adds treat "duplicate column name" as already applied.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    for statement in MIGRATIONS {
        match conn.execute(statement, []) {
            Ok(_) => {}
            Err(err) if is_duplicate_column(&err) => {}
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    err.to_string().contains("duplicate column name")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_schema_creates_table_and_indices() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert!(tables.contains(&"tasks".to_owned()));

        let indices: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert!(indices.contains(&"idx_tasks_status".to_owned()));
        assert!(indices.contains(&"idx_tasks_priority".to_owned()));
        assert!(indices.contains(&"idx_tasks_retry_after".to_owned()));
    }

    #[test]
    fn apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
    }

    #[test]
    fn migrations_upgrade_a_pre_dependency_schema() {
        let conn = Connection::open_in_memory().unwrap();
        // Simulate a database created before the depends_on / progress
        // columns existed.
        conn.execute_batch(
            "CREATE TABLE tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                prompt TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority TEXT NOT NULL DEFAULT 'medium',
                created_at INTEGER NOT NULL
            )",
        )
        .unwrap();

        apply_schema(&conn).unwrap();

        conn.execute(
            "UPDATE tasks SET depends_on = NULL, progress_tool_calls = 0",
            [],
        )
        .unwrap();
    }
}
