//! Wire types shared with the external agent runner.
//!
//! The runner is a black box behind [`crate::runtime::AgentRunner`]; these
//! types are the minimal surface the executor inspects. Part kinds beyond
//! the known four deserialize to [`MessagePart::Other`] and are ignored.

use serde::{Deserialize, Serialize};

/// What the runner reports a session is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

/// One message in a runner session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: MessageRole,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl AgentMessage {
    pub fn assistant(parts: Vec<MessagePart>) -> Self {
        Self {
            role: MessageRole::Assistant,
            parts,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }
}

/// One content part of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolUse {
        id: String,
        #[serde(default)]
        name: String,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: String,
    },
    /// Any part kind this daemon does not understand.
    #[serde(other)]
    Other,
}

impl MessagePart {
    /// Tool activity counts both invocations and their results.
    pub fn is_tool_activity(&self) -> bool {
        matches!(
            self,
            MessagePart::ToolUse { .. } | MessagePart::ToolResult { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Todo,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    /// Completed and cancelled todos no longer block task completion.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TodoStatus::Completed | TodoStatus::Cancelled)
    }
}

/// One entry in the agent's todo list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub status: TodoStatus,
    #[serde(default)]
    pub content: String,
}
