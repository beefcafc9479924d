//! In-process runner client for a local agent server.
//!
//! Speaks plain JSON over HTTP to an agent server on localhost. Error
//! bodies are surfaced verbatim so the classifier can read rate-limit and
//! context messages out of them.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::runner::AgentRunner;
use crate::models::{AgentMessage, SessionStatus, Todo};

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    directory: &'a str,
    title: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct PromptRequest<'a> {
    directory: &'a str,
    agent: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: SessionStatus,
}

#[derive(Debug, Serialize)]
struct ToolResultsRequest<'a> {
    directory: &'a str,
    tool_ids: &'a [String],
}

pub struct HttpAgentRunner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentRunner {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client for agent runner")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Agent server returned {}: {}", status, body);
        }
        Ok(response)
    }
}

#[async_trait]
impl AgentRunner for HttpAgentRunner {
    async fn create_session(&self, work_dir: &Path, title: &str) -> Result<String> {
        let directory = work_dir.to_string_lossy();
        let request = CreateSessionRequest {
            directory: directory.as_ref(),
            title,
        };
        let response = self
            .client
            .post(self.url("/session"))
            .json(&request)
            .send()
            .await
            .context("Failed to reach agent server")?;
        let created: CreateSessionResponse = Self::check(response).await?.json().await?;
        Ok(created.id)
    }

    async fn send_prompt(
        &self,
        session_id: &str,
        work_dir: &Path,
        agent: &str,
        text: &str,
    ) -> Result<()> {
        let directory = work_dir.to_string_lossy();
        let request = PromptRequest {
            directory: directory.as_ref(),
            agent,
            text,
        };
        let response = self
            .client
            .post(self.url(&format!("/session/{session_id}/prompt")))
            .json(&request)
            .send()
            .await
            .context("Failed to reach agent server")?;
        Self::check(response).await?;
        Ok(())
    }

    async fn status(&self, session_id: &str, work_dir: &Path) -> Result<SessionStatus> {
        let response = self
            .client
            .get(self.url(&format!("/session/{session_id}/status")))
            .query(&[("directory", work_dir.to_string_lossy().as_ref())])
            .send()
            .await
            .context("Failed to reach agent server")?;
        let status: StatusResponse = Self::check(response).await?.json().await?;
        Ok(status.status)
    }

    async fn messages(&self, session_id: &str, work_dir: &Path) -> Result<Vec<AgentMessage>> {
        let response = self
            .client
            .get(self.url(&format!("/session/{session_id}/messages")))
            .query(&[("directory", work_dir.to_string_lossy().as_ref())])
            .send()
            .await
            .context("Failed to reach agent server")?;
        let messages: Vec<AgentMessage> = Self::check(response).await?.json().await?;
        Ok(messages)
    }

    async fn todos(&self, session_id: &str) -> Result<Vec<Todo>> {
        let response = self
            .client
            .get(self.url(&format!("/session/{session_id}/todos")))
            .send()
            .await
            .context("Failed to reach agent server")?;
        let todos: Vec<Todo> = Self::check(response).await?.json().await?;
        Ok(todos)
    }

    async fn inject_tool_results(
        &self,
        session_id: &str,
        work_dir: &Path,
        pending_tool_ids: &[String],
    ) -> Result<()> {
        let directory = work_dir.to_string_lossy();
        let request = ToolResultsRequest {
            directory: directory.as_ref(),
            tool_ids: pending_tool_ids,
        };
        let response = self
            .client
            .post(self.url(&format!("/session/{session_id}/tool-results")))
            .json(&request)
            .send()
            .await
            .context("Failed to reach agent server")?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let runner = HttpAgentRunner::new("http://127.0.0.1:4242/").unwrap();
        assert_eq!(
            runner.url("/session/abc/status"),
            "http://127.0.0.1:4242/session/abc/status"
        );
    }
}
