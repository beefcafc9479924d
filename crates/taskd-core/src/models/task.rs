//! The task record and its state machine.
//!
//! A task is one user request tracked end-to-end: queued by an ingress
//! adapter, picked up by the scheduler, driven through an external agent
//! session by the executor, and finished in exactly one terminal state.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::runtime::retry::ErrorKind;

/// Hard cap on prompt length, in characters.
pub const MAX_PROMPT_LEN: usize = 10_000;

/// Default cap on continuation rounds per task.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Default cap on retries per task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Whether this status ends the task's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(anyhow!("Unknown task status '{}'", other)),
        }
    }
}

/// Ordering key for the queue. Lower rank is picked first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Urgent,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Urgent => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Urgent => "urgent",
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

impl FromStr for TaskPriority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "urgent" => Ok(TaskPriority::Urgent),
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            other => Err(anyhow!("Unknown task priority '{}'", other)),
        }
    }
}

/// Where a task entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Discord,
    Slack,
    Cli,
}

impl TaskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskSource::Discord => "discord",
            TaskSource::Slack => "slack",
            TaskSource::Cli => "cli",
        }
    }
}

impl Default for TaskSource {
    fn default() -> Self {
        TaskSource::Cli
    }
}

impl FromStr for TaskSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "discord" => Ok(TaskSource::Discord),
            "slack" => Ok(TaskSource::Slack),
            "cli" => Ok(TaskSource::Cli),
            other => Err(anyhow!("Unknown task source '{}'", other)),
        }
    }
}

/// A queued task as persisted in the store.
///
/// Timestamps are milliseconds since the Unix epoch. Progress fields are
/// observational only; the executor refreshes them while the agent is busy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub prompt: String,
    pub project_path: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub result: Option<String>,
    pub error: Option<String>,
    pub error_type: Option<ErrorKind>,
    pub session_id: Option<String>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_after: Option<i64>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_by: String,
    pub source: TaskSource,
    pub depends_on: Option<i64>,
    pub progress_tool_calls: u32,
    pub progress_last_tool: Option<String>,
    pub progress_last_message: Option<String>,
    pub progress_updated_at: Option<i64>,
}

/// Fields an ingress adapter supplies when enqueueing a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub prompt: String,
    pub project_path: Option<String>,
    pub priority: TaskPriority,
    pub created_by: String,
    pub source: TaskSource,
    pub max_iterations: Option<u32>,
    pub max_retries: Option<u32>,
    pub depends_on: Option<i64>,
}

impl NewTask {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// Validate a prompt for admission: non-blank after trim, at most
/// [`MAX_PROMPT_LEN`] characters.
pub fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        bail!("Prompt must not be empty");
    }
    let len = prompt.chars().count();
    if len > MAX_PROMPT_LEN {
        bail!(
            "Prompt is {} characters, maximum is {}",
            len,
            MAX_PROMPT_LEN
        );
    }
    Ok(())
}
