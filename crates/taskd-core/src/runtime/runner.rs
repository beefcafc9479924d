//! The contract with the external agent runner.
//!
//! Two implementations exist: an in-process HTTP client for a local agent
//! server and a subprocess wrapper around the agent CLI. The executor only
//! ever sees this trait.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::models::{AgentMessage, SessionStatus, Todo};

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Open a new conversation bound to a working directory.
    /// Returns the runner's session id.
    async fn create_session(&self, work_dir: &Path, title: &str) -> Result<String>;

    /// Deliver a prompt into the session. Returns once the runner has
    /// accepted it; the agent works asynchronously afterwards.
    async fn send_prompt(
        &self,
        session_id: &str,
        work_dir: &Path,
        agent: &str,
        text: &str,
    ) -> Result<()>;

    /// Whether the session is idle or still working.
    async fn status(&self, session_id: &str, work_dir: &Path) -> Result<SessionStatus>;

    /// The full ordered transcript of the session.
    async fn messages(&self, session_id: &str, work_dir: &Path) -> Result<Vec<AgentMessage>>;

    /// The agent's current todo list, flat.
    async fn todos(&self, session_id: &str) -> Result<Vec<Todo>>;

    /// Recovery hook: synthesize results for tool calls the conversation
    /// left dangling, so the session becomes promptable again.
    async fn inject_tool_results(
        &self,
        session_id: &str,
        work_dir: &Path,
        pending_tool_ids: &[String],
    ) -> Result<()>;
}

/// Tool-use ids that never received a matching tool_result. These are what
/// [`AgentRunner::inject_tool_results`] repairs.
pub fn pending_tool_ids(messages: &[AgentMessage]) -> Vec<String> {
    use crate::models::MessagePart;
    use std::collections::HashSet;

    let mut resolved: HashSet<&str> = HashSet::new();
    for message in messages {
        for part in &message.parts {
            if let MessagePart::ToolResult { tool_use_id, .. } = part {
                resolved.insert(tool_use_id.as_str());
            }
        }
    }

    let mut pending = Vec::new();
    for message in messages {
        for part in &message.parts {
            if let MessagePart::ToolUse { id, .. } = part {
                if !resolved.contains(id.as_str()) {
                    pending.push(id.clone());
                }
            }
        }
    }
    pending
}
