//! Drives one task through an external agent session until genuine
//! completion.
//!
//! The runner's completion contract is observationally incomplete: it can
//! report idle before producing output, report idle with todos still open,
//! or never report idle at all. Each iteration therefore layers four
//! corroborating checks (idle status, minimum session age, validated
//! output, todo completion) plus a stability heuristic that treats a
//! transcript frozen across several busy polls as an implicit idle.

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::runner::AgentRunner;
use super::signals;
use crate::models::{AgentMessage, MessagePart, MessageRole, SessionStatus, Task};
use crate::storage::{ProgressUpdate, TaskQueueStorage};

/// Fallback output when a session finished without any assistant text.
const NO_OUTPUT_SENTINEL: &str = "Task completed (no output captured)";

/// Fixed reminder sent on every continuation round.
const CONTINUATION_PROMPT: &str = "Continue working through your todo list. Resume any pending or \
    in-progress todos without asking for permission. When every todo is completed, reply with \
    [TASK_COMPLETE] and a summary of what was done.";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Overall budget for one task execution across all iterations.
    pub task_timeout: Duration,
    /// Budget for one prompt/response iteration.
    pub iteration_timeout: Duration,
    /// Sleep between status polls, and between iterations.
    pub poll_interval: Duration,
    /// Ignore idle reports younger than this; fresh sessions briefly report
    /// idle before the prompt lands.
    pub session_warmup: Duration,
    /// Minimum session age before the stability heuristic may fire.
    pub stability_window: Duration,
    /// Consecutive unchanged busy polls treated as implicit idle.
    pub stable_polls_threshold: u32,
    /// Logical agent name passed to the runner.
    pub agent: String,
    /// Default working directory for tasks without a project_path.
    pub workspace: PathBuf,
    /// Specialist agent names advertised in the initial prompt.
    pub available_agents: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_millis(1_800_000),
            iteration_timeout: Duration::from_millis(600_000),
            poll_interval: Duration::from_secs(2),
            session_warmup: Duration::from_secs(5),
            stability_window: Duration::from_secs(10),
            stable_polls_threshold: 3,
            agent: "default".to_string(),
            workspace: PathBuf::from("."),
            available_agents: Vec::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            task_timeout: config.task_timeout,
            iteration_timeout: config.iteration_timeout,
            agent: config.agent.clone(),
            workspace: config.workspace.clone(),
            ..Default::default()
        }
    }

    /// Working directory for a task: its project_path override or the
    /// configured workspace.
    pub fn work_dir_for(&self, task: &Task) -> PathBuf {
        match task.project_path.as_deref() {
            Some(path) => PathBuf::from(path),
            None => self.workspace.clone(),
        }
    }
}

/// What one iteration concluded about the session.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub output: String,
    pub session_id: String,
    pub is_complete: bool,
    pub needs_continuation: bool,
}

/// Wrap the user request with the instructions the loop depends on: keep a
/// todo list, never stop to ask permission, and emit the completion marker.
pub fn initial_prompt(user_prompt: &str, available_agents: &[String]) -> String {
    let mut prompt = format!(
        "You are working autonomously on the following task:\n\n{user_prompt}\n\n\
         Track your work with a todo list. Do not ask for permission or \
         confirmation; make reasonable decisions and keep going. When every \
         objective is met, reply with [TASK_COMPLETE] followed by a summary \
         of what was done."
    );
    if !available_agents.is_empty() {
        prompt.push_str(&format!(
            "\n\nSpecialist agents available for delegation: {}.",
            available_agents.join(", ")
        ));
    }
    prompt
}

pub struct TaskExecutor {
    runner: Arc<dyn AgentRunner>,
    queue: TaskQueueStorage,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(
        runner: Arc<dyn AgentRunner>,
        queue: TaskQueueStorage,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            runner,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a task to completion, iterating within one session until the
    /// output says the work is done, the agent stops needing continuation,
    /// or the iteration cap is reached. Runner errors propagate to the
    /// scheduler for classification.
    pub async fn run_task(&self, task: &Task) -> Result<String> {
        let work_dir = self.config.work_dir_for(task);
        self.queue
            .set_running(task.id, &format!("loop-{}", Utc::now().timestamp_millis()))?;

        let mut session: Option<(String, Instant)> = None;
        let mut last_output = String::new();

        loop {
            let iteration = self.queue.increment_iteration(task.id)?;
            if iteration > task.max_iterations {
                warn!(
                    task_id = task.id,
                    max_iterations = task.max_iterations,
                    "Iteration cap reached"
                );
                return Ok(format!("Max iterations reached. Last output:\n{last_output}"));
            }

            let prompt = if iteration == 1 {
                initial_prompt(&task.prompt, &self.config.available_agents)
            } else {
                CONTINUATION_PROMPT.to_string()
            };

            debug!(task_id = task.id, iteration, "Starting iteration");
            let outcome = self
                .run_iteration(task, &prompt, &mut session, &work_dir)
                .await?;
            last_output = outcome.output.clone();

            if outcome.is_complete {
                info!(task_id = task.id, iteration, "Task reported complete");
                return Ok(outcome.output);
            }
            if !outcome.needs_continuation {
                info!(task_id = task.id, iteration, "No further work detected");
                return Ok(outcome.output);
            }

            debug!(task_id = task.id, iteration, "Continuation needed");
            sleep(self.config.poll_interval).await;
        }
    }

    /// One prompt/response round. Creates the session on first use and
    /// persists its id before anything else depends on it.
    async fn run_iteration(
        &self,
        task: &Task,
        prompt: &str,
        session: &mut Option<(String, Instant)>,
        work_dir: &Path,
    ) -> Result<IterationOutcome> {
        let (session_id, created_at) = match session.as_ref() {
            Some((id, created_at)) => (id.clone(), *created_at),
            None => {
                let id = self
                    .runner
                    .create_session(work_dir, &format!("Task #{}", task.id))
                    .await?;
                self.queue.update_session_id(task.id, &id)?;
                let created_at = Instant::now();
                *session = Some((id.clone(), created_at));
                debug!(task_id = task.id, session_id = %id, "Created session");
                (id, created_at)
            }
        };

        self.runner
            .send_prompt(&session_id, work_dir, &self.config.agent, prompt)
            .await?;

        // The deadline bounds the whole poll loop, runner calls included.
        let settled = tokio::time::timeout(
            self.config.iteration_timeout,
            self.poll_until_settled(task, &session_id, created_at, work_dir),
        )
        .await
        .map_err(|_| {
            anyhow!(
                "Iteration timed out after {} ms",
                self.config.iteration_timeout.as_millis()
            )
        })??;

        Ok(IterationOutcome {
            output: settled.0,
            session_id,
            is_complete: settled.1,
            needs_continuation: settled.2,
        })
    }

    /// The stability poll loop: watch the session until it has genuinely
    /// settled, reporting (output, is_complete, needs_continuation).
    async fn poll_until_settled(
        &self,
        task: &Task,
        session_id: &str,
        created_at: Instant,
        work_dir: &Path,
    ) -> Result<(String, bool, bool)> {
        let mut stable_polls = 0u32;
        let mut prev_message_count: Option<usize> = None;

        loop {
            sleep(self.config.poll_interval).await;

            match self.runner.status(session_id, work_dir).await? {
                SessionStatus::Idle => {
                    // Fresh sessions can report idle before the prompt is
                    // picked up; ignore until the warm-up has passed.
                    if created_at.elapsed() < self.config.session_warmup {
                        continue;
                    }
                    let messages = self.runner.messages(session_id, work_dir).await?;
                    if let Some(concluded) = self.try_conclude(session_id, &messages).await? {
                        return Ok(concluded);
                    }
                }
                SessionStatus::Busy => {
                    let messages = self.runner.messages(session_id, work_dir).await?;
                    self.capture_progress(task.id, &messages)?;

                    let count = messages.len();
                    if created_at.elapsed() >= self.config.stability_window
                        && prev_message_count == Some(count)
                    {
                        stable_polls += 1;
                    } else {
                        stable_polls = 0;
                    }
                    prev_message_count = Some(count);

                    if stable_polls >= self.config.stable_polls_threshold {
                        debug!(
                            task_id = task.id,
                            stable_polls, "Transcript frozen while busy, treating as idle"
                        );
                        if let Some(concluded) = self.try_conclude(session_id, &messages).await? {
                            return Ok(concluded);
                        }
                    }
                }
            }
        }
    }

    /// The idle-branch checks. Returns None while the session has produced
    /// no real output yet (keep polling); otherwise the settled verdict.
    async fn try_conclude(
        &self,
        session_id: &str,
        messages: &[AgentMessage],
    ) -> Result<Option<(String, bool, bool)>> {
        if !has_real_output(messages) {
            return Ok(None);
        }

        let todos = self.runner.todos(session_id).await?;
        let open_todos = todos.iter().filter(|t| !t.status.is_terminal()).count();
        let output = extract_output(messages);

        if open_todos > 0 {
            debug!(session_id, open_todos, "Todos still open, continuing");
            return Ok(Some((output, false, true)));
        }

        let is_complete = signals::is_complete(&output);
        let tool_activity = messages
            .iter()
            .any(|m| m.parts.iter().any(|p| p.is_tool_activity()));
        let needs_continuation = signals::needs_continuation(&output, tool_activity);
        Ok(Some((output, is_complete, needs_continuation)))
    }

    /// Refresh the observational progress columns from the transcript.
    fn capture_progress(&self, task_id: i64, messages: &[AgentMessage]) -> Result<()> {
        let mut tool_calls = 0u32;
        let mut last_tool: Option<String> = None;
        let mut last_message: Option<String> = None;

        for message in messages {
            if message.role != MessageRole::Assistant {
                continue;
            }
            for part in &message.parts {
                match part {
                    MessagePart::ToolUse { name, .. } => {
                        tool_calls += 1;
                        if !name.is_empty() {
                            last_tool = Some(name.clone());
                        }
                    }
                    MessagePart::ToolResult { .. } => {
                        tool_calls += 1;
                    }
                    MessagePart::Text { text } => {
                        if !text.trim().is_empty() {
                            last_message = Some(text.clone());
                        }
                    }
                    _ => {}
                }
            }
        }

        self.queue.update_progress(
            task_id,
            ProgressUpdate {
                tool_calls,
                last_tool,
                last_message,
            },
        )
    }
}

/// A session has real output once any assistant or tool message carries a
/// non-empty text/reasoning part or any tool activity.
fn has_real_output(messages: &[AgentMessage]) -> bool {
    messages
        .iter()
        .filter(|m| matches!(m.role, MessageRole::Assistant | MessageRole::Tool))
        .any(|m| {
            m.parts.iter().any(|part| match part {
                MessagePart::Text { text } | MessagePart::Reasoning { text } => {
                    !text.trim().is_empty()
                }
                MessagePart::ToolUse { .. } | MessagePart::ToolResult { .. } => true,
                MessagePart::Other => false,
            })
        })
}

/// Concatenate assistant text parts in order, blank-line separated.
fn extract_output(messages: &[AgentMessage]) -> String {
    let mut chunks: Vec<&str> = Vec::new();
    for message in messages {
        if message.role != MessageRole::Assistant {
            continue;
        }
        for part in &message.parts {
            if let MessagePart::Text { text } = part {
                if !text.trim().is_empty() {
                    chunks.push(text);
                }
            }
        }
    }
    if chunks.is_empty() {
        NO_OUTPUT_SENTINEL.to_string()
    } else {
        chunks.join("\n\n")
    }
}
