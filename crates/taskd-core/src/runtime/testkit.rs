//! Scripted runner double for executor and scheduler tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::runner::AgentRunner;
use crate::models::{AgentMessage, MessagePart, SessionStatus, Todo};

/// A runner whose responses are queued up front. Queued transcripts and
/// todo lists are consumed in order; the last entry repeats once the queue
/// is down to one, and an empty queue yields empty responses.
#[derive(Default)]
pub struct MockRunner {
    busy: AtomicBool,
    growing_transcript: AtomicBool,
    sessions: AtomicUsize,
    message_fetches: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    send_failures: Mutex<VecDeque<String>>,
    transcripts: Mutex<VecDeque<Vec<AgentMessage>>>,
    todo_lists: Mutex<VecDeque<Vec<Todo>>>,
    injections: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report busy on every status poll instead of idle.
    pub fn always_busy(&self) {
        self.busy.store(true, Ordering::SeqCst);
    }

    /// Make each transcript fetch one message longer than the last, so the
    /// stability heuristic never sees a frozen message count.
    pub fn grow_transcript_forever(&self) {
        self.growing_transcript.store(true, Ordering::SeqCst);
    }

    pub fn push_messages(&self, messages: Vec<AgentMessage>) {
        self.transcripts.lock().unwrap().push_back(messages);
    }

    pub fn push_todos(&self, todos: Vec<Todo>) {
        self.todo_lists.lock().unwrap().push_back(todos);
    }

    /// Queue an error for the next send_prompt call.
    pub fn fail_next_send(&self, message: &str) {
        self.send_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn message_fetches(&self) -> usize {
        self.message_fetches.load(Ordering::SeqCst)
    }

    pub fn prompts_sent(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn injected_tool_results(&self) -> Vec<(String, Vec<String>)> {
        self.injections.lock().unwrap().clone()
    }

    fn next_queued<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl AgentRunner for MockRunner {
    async fn create_session(&self, _work_dir: &Path, _title: &str) -> Result<String> {
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mock-session-{n}"))
    }

    async fn send_prompt(
        &self,
        _session_id: &str,
        _work_dir: &Path,
        _agent: &str,
        text: &str,
    ) -> Result<()> {
        if let Some(message) = self.send_failures.lock().unwrap().pop_front() {
            bail!("{message}");
        }
        self.prompts.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn status(&self, _session_id: &str, _work_dir: &Path) -> Result<SessionStatus> {
        if self.busy.load(Ordering::SeqCst) {
            Ok(SessionStatus::Busy)
        } else {
            Ok(SessionStatus::Idle)
        }
    }

    async fn messages(&self, _session_id: &str, _work_dir: &Path) -> Result<Vec<AgentMessage>> {
        let fetch = self.message_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.growing_transcript.load(Ordering::SeqCst) {
            let transcript = (0..fetch)
                .map(|i| {
                    AgentMessage::assistant(vec![MessagePart::Text {
                        text: format!("update {i}"),
                    }])
                })
                .collect();
            return Ok(transcript);
        }
        Ok(Self::next_queued(&self.transcripts).unwrap_or_default())
    }

    async fn todos(&self, _session_id: &str) -> Result<Vec<Todo>> {
        Ok(Self::next_queued(&self.todo_lists).unwrap_or_default())
    }

    async fn inject_tool_results(
        &self,
        session_id: &str,
        _work_dir: &Path,
        pending_tool_ids: &[String],
    ) -> Result<()> {
        self.injections
            .lock()
            .unwrap()
            .push((session_id.to_string(), pending_tool_ids.to_vec()));
        Ok(())
    }
}
