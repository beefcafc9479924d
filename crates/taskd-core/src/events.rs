//! Lifecycle event fan-out.
//!
//! The scheduler emits one event per task transition; registered observers
//! (bots, webhooks, the console) each receive it independently. A broken
//! or slow observer never blocks the others and never reaches the
//! scheduler as an error.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::models::Task;

/// How long one observer may spend on one event.
const DEFAULT_OBSERVER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Started,
    Completed,
    Failed,
}

impl TaskEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEventKind::Started => "started",
            TaskEventKind::Completed => "completed",
            TaskEventKind::Failed => "failed",
        }
    }
}

/// A lifecycle notification: the kind, a snapshot of the task, and the
/// result or error text where one exists.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task: Task,
    pub detail: Option<String>,
}

impl TaskEvent {
    pub fn started(task: Task) -> Self {
        Self {
            kind: TaskEventKind::Started,
            task,
            detail: None,
        }
    }

    pub fn completed(task: Task, result: impl Into<String>) -> Self {
        Self {
            kind: TaskEventKind::Completed,
            task,
            detail: Some(result.into()),
        }
    }

    pub fn failed(task: Task, error: impl Into<String>) -> Self {
        Self {
            kind: TaskEventKind::Failed,
            task,
            detail: Some(error.into()),
        }
    }
}

/// One registered event consumer.
#[async_trait]
pub trait TaskObserver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, event: &TaskEvent) -> anyhow::Result<()>;
}

/// Fan-out sink over the registered observers.
pub struct EventSink {
    observers: Vec<Arc<dyn TaskObserver>>,
    observer_timeout: Duration,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            observer_timeout: DEFAULT_OBSERVER_TIMEOUT,
        }
    }

    pub fn with_observer_timeout(mut self, observer_timeout: Duration) -> Self {
        self.observer_timeout = observer_timeout;
        self
    }

    pub fn register(&mut self, observer: Arc<dyn TaskObserver>) {
        self.observers.push(observer);
    }

    /// Deliver an event to every observer concurrently. Observer errors and
    /// timeouts are logged and swallowed.
    pub async fn emit(&self, event: TaskEvent) {
        let event = Arc::new(event);
        let mut deliveries = Vec::with_capacity(self.observers.len());

        for observer in &self.observers {
            let observer = observer.clone();
            let event = event.clone();
            let budget = self.observer_timeout;
            deliveries.push(tokio::spawn(async move {
                match timeout(budget, observer.notify(&event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(
                            observer = observer.name(),
                            event = event.kind.as_str(),
                            task_id = event.task.id,
                            error = %err,
                            "Observer failed to handle event"
                        );
                    }
                    Err(_) => {
                        warn!(
                            observer = observer.name(),
                            event = event.kind.as_str(),
                            task_id = event.task.id,
                            "Observer timed out handling event"
                        );
                    }
                }
            }));
        }

        for delivery in deliveries {
            let _ = delivery.await;
        }
    }
}

/// Logs every event; registered by the foreground daemon so operators see
/// lifecycle transitions in the daemon log.
pub struct ConsoleObserver;

#[async_trait]
impl TaskObserver for ConsoleObserver {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn notify(&self, event: &TaskEvent) -> anyhow::Result<()> {
        match event.detail.as_deref() {
            Some(detail) => info!(
                task_id = event.task.id,
                event = event.kind.as_str(),
                detail,
                "Task event"
            ),
            None => info!(
                task_id = event.task.id,
                event = event.kind.as_str(),
                "Task event"
            ),
        }
        Ok(())
    }
}
