//! Subprocess runner: drives the agent CLI one invocation per call.
//!
//! Each trait method shells out to the agent binary with a `session`
//! subcommand and parses its JSON stdout. Failures carry stderr text so
//! the classifier can read the underlying cause.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use super::runner::AgentRunner;
use crate::models::{AgentMessage, SessionStatus, Todo};

#[derive(Debug, Deserialize)]
struct SessionCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SessionState {
    status: SessionStatus,
}

pub struct CliAgentRunner {
    binary: String,
}

impl CliAgentRunner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(binary = %self.binary, ?args, "Invoking agent CLI");

        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| anyhow!("Failed to spawn agent CLI '{}': {}", self.binary, err))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Agent CLI exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_json<T: serde::de::DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let stdout = self.run(args).await?;
        serde_json::from_str(stdout.trim())
            .with_context(|| format!("Unparsable agent CLI output: {}", stdout.trim()))
    }
}

#[async_trait]
impl AgentRunner for CliAgentRunner {
    async fn create_session(&self, work_dir: &Path, title: &str) -> Result<String> {
        let dir = work_dir.to_string_lossy();
        let created: SessionCreated = self
            .run_json(&[
                "session",
                "create",
                "--directory",
                dir.as_ref(),
                "--title",
                title,
                "--json",
            ])
            .await?;
        Ok(created.id)
    }

    async fn send_prompt(
        &self,
        session_id: &str,
        work_dir: &Path,
        agent: &str,
        text: &str,
    ) -> Result<()> {
        let dir = work_dir.to_string_lossy();
        self.run(&[
            "session",
            "prompt",
            session_id,
            "--directory",
            dir.as_ref(),
            "--agent",
            agent,
            "--message",
            text,
        ])
        .await?;
        Ok(())
    }

    async fn status(&self, session_id: &str, work_dir: &Path) -> Result<SessionStatus> {
        let dir = work_dir.to_string_lossy();
        let state: SessionState = self
            .run_json(&[
                "session",
                "status",
                session_id,
                "--directory",
                dir.as_ref(),
                "--json",
            ])
            .await?;
        Ok(state.status)
    }

    async fn messages(&self, session_id: &str, work_dir: &Path) -> Result<Vec<AgentMessage>> {
        let dir = work_dir.to_string_lossy();
        self.run_json(&[
            "session",
            "messages",
            session_id,
            "--directory",
            dir.as_ref(),
            "--json",
        ])
        .await
    }

    async fn todos(&self, session_id: &str) -> Result<Vec<Todo>> {
        self.run_json(&["session", "todos", session_id, "--json"]).await
    }

    async fn inject_tool_results(
        &self,
        session_id: &str,
        work_dir: &Path,
        pending_tool_ids: &[String],
    ) -> Result<()> {
        let dir = work_dir.to_string_lossy();
        let mut args: Vec<&str> =
            vec!["session", "tool-results", session_id, "--directory", dir.as_ref()];
        for id in pending_tool_ids {
            args.push("--tool-id");
            args.push(id.as_str());
        }
        self.run(&args).await?;
        Ok(())
    }
}
