//! Queue operations over the task table.
//!
//! This is the only module that writes task rows. Ingress adapters insert
//! and cancel; the scheduler and executor own every other transition. All
//! statements are parameterized.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::str::FromStr;

use super::db::Database;
use crate::models::{validate_prompt, NewTask, Task, TaskStatus};
use crate::runtime::retry::ErrorKind;

/// Progress fields are observational; last_message is clamped to this many
/// characters before persisting.
const MAX_PROGRESS_MESSAGE_LEN: usize = 1_000;

const TASK_COLUMNS: &str = "id, prompt, project_path, status, priority, result, error, error_type, \
     session_id, iteration, max_iterations, retry_count, max_retries, retry_after, \
     created_at, started_at, completed_at, created_by, source, depends_on, \
     progress_tool_calls, progress_last_tool, progress_last_message, progress_updated_at";

/// Observational progress snapshot captured while the agent is busy.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub tool_calls: u32,
    pub last_tool: Option<String>,
    pub last_message: Option<String>,
}

/// Per-status row counts for the read-only stats view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: u32,
    pub running: u32,
    pub done: u32,
    pub failed: u32,
    pub cancelled: u32,
    pub total: u32,
}

/// Cloneable handle exposing the queue contract over the shared database.
#[derive(Clone)]
pub struct TaskQueueStorage {
    db: Database,
}

impl TaskQueueStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Admit a new task. Validates the prompt and project path, checks that
    /// a declared dependency exists, and returns the inserted row.
    pub fn create(&self, new: NewTask) -> Result<Task> {
        validate_prompt(&new.prompt)?;
        if let Some(path) = new.project_path.as_deref() {
            crate::config::validate_project_path(path)?;
        }

        self.db.with_conn(|conn| {
            if let Some(parent_id) = new.depends_on {
                let exists: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM tasks WHERE id = ?1",
                        params![parent_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    bail!("Dependency task {} does not exist", parent_id);
                }
            }

            conn.execute(
                "INSERT INTO tasks (prompt, project_path, priority, created_at, created_by, \
                 source, max_iterations, max_retries, depends_on) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    new.prompt,
                    new.project_path,
                    new.priority.as_str(),
                    now_ms(),
                    new.created_by,
                    new.source.as_str(),
                    new.max_iterations.unwrap_or(crate::models::DEFAULT_MAX_ITERATIONS),
                    new.max_retries.unwrap_or(crate::models::DEFAULT_MAX_RETRIES),
                    new.depends_on,
                ],
            )?;

            let id = conn.last_insert_rowid();
            get_task(conn, id)?.context("Inserted task row disappeared")
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<Task>> {
        self.db.with_conn(|conn| get_task(conn, id))
    }

    /// The eligible pending task with the best (priority rank, created_at)
    /// key. A task is eligible once its retry_after has elapsed and its
    /// dependency, if any, is done. Dependency gating lives in the query so
    /// the pick is atomic with respect to concurrent inserts.
    pub fn next_retryable(&self) -> Result<Option<Task>> {
        self.db.with_conn(|conn| {
            let task = conn
                .query_row(
                    &format!(
                        "SELECT {TASK_COLUMNS} FROM tasks t \
                         WHERE t.status = 'pending' \
                           AND (t.retry_after IS NULL OR t.retry_after <= ?1) \
                           AND (t.depends_on IS NULL OR EXISTS ( \
                                SELECT 1 FROM tasks p \
                                WHERE p.id = t.depends_on AND p.status = 'done')) \
                         ORDER BY CASE t.priority \
                                    WHEN 'urgent' THEN 0 \
                                    WHEN 'high' THEN 1 \
                                    WHEN 'medium' THEN 2 \
                                    ELSE 3 END, \
                                  t.created_at, t.id \
                         LIMIT 1"
                    ),
                    params![now_ms()],
                    task_from_row,
                )
                .optional()?;
            Ok(task)
        })
    }

    /// The currently running task, if any. The scheduler keeps this at most
    /// one; startup recovery restores the invariant after a crash.
    pub fn running(&self) -> Result<Option<Task>> {
        self.db.with_conn(|conn| {
            let task = conn
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'running' LIMIT 1"),
                    [],
                    task_from_row,
                )
                .optional()?;
            Ok(task)
        })
    }

    pub fn set_running(&self, id: i64, session_id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET status = 'running', session_id = ?2, started_at = ?3 \
                 WHERE id = ?1",
                params![id, session_id, now_ms()],
            )?;
            Ok(())
        })
    }

    pub fn set_done(&self, id: i64, result: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET status = 'done', result = ?2, completed_at = ?3 WHERE id = ?1",
                params![id, result, now_ms()],
            )?;
            Ok(())
        })
    }

    pub fn set_failed(&self, id: i64, error: &str, kind: ErrorKind) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET status = 'failed', error = ?2, error_type = ?3, \
                 completed_at = ?4 WHERE id = ?1",
                params![id, error, kind.as_str(), now_ms()],
            )?;
            Ok(())
        })
    }

    /// Cancel a pending task. Returns true iff the row was pending; a task
    /// that already started is not preempted.
    pub fn cancel(&self, id: i64) -> Result<bool> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = 'cancelled', completed_at = ?2 \
                 WHERE id = ?1 AND status = 'pending'",
                params![id, now_ms()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Recovery transition: back to pending with the session state cleared.
    pub fn reset_to_pending(&self, id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET status = 'pending', session_id = NULL, started_at = NULL, \
                 iteration = 0 WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
    }

    /// Reset every task left in running state by a previous process.
    /// Returns how many rows were recovered.
    pub fn recover_orphaned(&self) -> Result<u32> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = 'pending', session_id = NULL, started_at = NULL, \
                 iteration = 0 WHERE status = 'running'",
                [],
            )?;
            Ok(changed as u32)
        })
    }

    /// Requeue a failed execution with a delay. Returns false without
    /// touching the row once retry_count has reached max_retries.
    pub fn schedule_retry(&self, id: i64, delay_secs: u64) -> Result<bool> {
        self.db.with_conn(|conn| {
            let retry_after = now_ms() + (delay_secs as i64) * 1_000;
            let changed = conn.execute(
                "UPDATE tasks SET status = 'pending', retry_count = retry_count + 1, \
                 retry_after = ?2, iteration = 0, session_id = NULL, started_at = NULL, \
                 error = NULL \
                 WHERE id = ?1 AND retry_count < max_retries",
                params![id, retry_after],
            )?;
            Ok(changed == 1)
        })
    }

    /// Bump the continuation counter and return the new value.
    pub fn increment_iteration(&self, id: i64) -> Result<u32> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET iteration = iteration + 1 WHERE id = ?1",
                params![id],
            )?;
            let iteration: u32 = conn.query_row(
                "SELECT iteration FROM tasks WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(iteration)
        })
    }

    pub fn update_session_id(&self, id: i64, session_id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET session_id = ?2 WHERE id = ?1",
                params![id, session_id],
            )?;
            Ok(())
        })
    }

    pub fn update_progress(&self, id: i64, progress: ProgressUpdate) -> Result<()> {
        let last_message = progress
            .last_message
            .map(|m| truncate_chars(&m, MAX_PROGRESS_MESSAGE_LEN));
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET progress_tool_calls = ?2, progress_last_tool = ?3, \
                 progress_last_message = ?4, progress_updated_at = ?5 WHERE id = ?1",
                params![
                    id,
                    progress.tool_calls,
                    progress.last_tool,
                    last_message,
                    now_ms()
                ],
            )?;
            Ok(())
        })
    }

    /// Pending children waiting on the given parent.
    pub fn dependent_tasks(&self, parent_id: i64) -> Result<Vec<Task>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE depends_on = ?1 AND status = 'pending' ORDER BY id"
            ))?;
            let tasks = stmt
                .query_map(params![parent_id], task_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// Atomically fail every pending child of a failed parent.
    /// Returns how many children were cascaded.
    pub fn fail_dependent_tasks(&self, parent_id: i64, reason: &str) -> Result<u32> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = 'failed', error = ?2, \
                 error_type = 'dependency_failed', completed_at = ?3 \
                 WHERE depends_on = ?1 AND status = 'pending'",
                params![parent_id, reason, now_ms()],
            )?;
            Ok(changed as u32)
        })
    }

    /// Read-only listing, newest first.
    pub fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>> {
        self.db.with_conn(|conn| {
            let tasks = match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 \
                         ORDER BY created_at DESC, id DESC LIMIT ?2"
                    ))?;
                    let rows = stmt
                        .query_map(params![status.as_str(), limit as i64], task_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {TASK_COLUMNS} FROM tasks \
                         ORDER BY created_at DESC, id DESC LIMIT ?1"
                    ))?;
                    let rows = stmt
                        .query_map(params![limit as i64], task_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };
            Ok(tasks)
        })
    }

    pub fn stats(&self) -> Result<QueueStats> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
            let mut stats = QueueStats::default();
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                match status.as_str() {
                    "pending" => stats.pending = count,
                    "running" => stats.running = count,
                    "done" => stats.done = count,
                    "failed" => stats.failed = count,
                    "cancelled" => stats.cancelled = count,
                    _ => {}
                }
                stats.total += count;
            }
            Ok(stats)
        })
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn get_task(conn: &Connection, id: i64) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            task_from_row,
        )
        .optional()?;
    Ok(task)
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn parse_text_column<T: FromStr>(value: String, idx: usize) -> rusqlite::Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.to_string().into())
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(3)?;
    let priority: String = row.get(4)?;
    let error_type: Option<String> = row.get(7)?;
    let source: String = row.get(18)?;

    Ok(Task {
        id: row.get(0)?,
        prompt: row.get(1)?,
        project_path: row.get(2)?,
        status: parse_text_column(status, 3)?,
        priority: parse_text_column(priority, 4)?,
        result: row.get(5)?,
        error: row.get(6)?,
        error_type: error_type
            .map(|raw| parse_text_column(raw, 7))
            .transpose()?,
        session_id: row.get(8)?,
        iteration: row.get(9)?,
        max_iterations: row.get(10)?,
        retry_count: row.get(11)?,
        max_retries: row.get(12)?,
        retry_after: row.get(13)?,
        created_at: row.get(14)?,
        started_at: row.get(15)?,
        completed_at: row.get(16)?,
        created_by: row.get(17)?,
        source: parse_text_column(source, 18)?,
        depends_on: row.get(19)?,
        progress_tool_calls: row.get(20)?,
        progress_last_tool: row.get(21)?,
        progress_last_message: row.get(22)?,
        progress_updated_at: row.get(23)?,
    })
}
