//! The single-worker scheduling loop.
//!
//! One long-lived loop picks the next eligible task, hands it to the
//! executor, and routes the outcome: terminal state into the store, a
//! lifecycle event into the sink, and failures through the classifier to
//! decide retry versus permanent failure.

use anyhow::{anyhow, bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::executor::{ExecutorConfig, TaskExecutor};
use super::retry::{
    backoff_delay_secs, classify, normalize_error_text, retry_after_hint, ErrorKind,
};
use super::runner::{pending_tool_ids, AgentRunner};
use crate::events::{EventSink, TaskEvent};
use crate::models::Task;
use crate::storage::TaskQueueStorage;

#[derive(Debug)]
pub enum SchedulerCommand {
    /// Stop picking tasks and exit the loop.
    Stop,
    /// Run a scheduling cycle immediately instead of waiting for the tick.
    CheckNow,
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    join_handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request a stop and wait up to `grace` for the loop to exit. An
    /// in-flight task keeps running until it finishes or the grace period
    /// lapses; a task cut off here is reset on the next start.
    pub async fn stop(self, grace: Duration) -> Result<()> {
        let _ = self.command_tx.send(SchedulerCommand::Stop).await;
        match tokio::time::timeout(grace, self.join_handle).await {
            Ok(_) => Ok(()),
            Err(_) => bail!(
                "Scheduler did not stop within {} ms; in-flight task will be recovered on next start",
                grace.as_millis()
            ),
        }
    }

    pub async fn check_now(&self) -> Result<()> {
        self.command_tx
            .send(SchedulerCommand::CheckNow)
            .await
            .map_err(|err| anyhow!("Failed to send check command: {}", err))
    }
}

pub struct Scheduler {
    queue: TaskQueueStorage,
    runner: Arc<dyn AgentRunner>,
    executor: TaskExecutor,
    sink: Arc<EventSink>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        queue: TaskQueueStorage,
        runner: Arc<dyn AgentRunner>,
        sink: Arc<EventSink>,
        executor_config: ExecutorConfig,
        poll_interval: Duration,
    ) -> Self {
        let executor = TaskExecutor::new(runner.clone(), queue.clone(), executor_config);
        Self {
            queue,
            runner,
            executor,
            sink,
            poll_interval,
        }
    }

    /// Spawn the loop and return its control handle.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (command_tx, command_rx) = mpsc::channel(16);
        let scheduler = self.clone();
        let join_handle = tokio::spawn(async move {
            scheduler.run_loop(command_rx).await;
        });
        SchedulerHandle {
            command_tx,
            join_handle,
        }
    }

    async fn run_loop(self: Arc<Self>, mut command_rx: mpsc::Receiver<SchedulerCommand>) {
        // A previous process may have died mid-task; restore the
        // at-most-one-running invariant before the first pick.
        match self.queue.recover_orphaned() {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "Reset orphaned running tasks to pending"),
            Err(err) => error!(error = %err, "Startup orphan recovery failed"),
        }

        let mut poll = interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Scheduler started"
        );

        loop {
            // Biased so a stop queued during a long execution wins over the
            // tick that is ready at the same time.
            tokio::select! {
                biased;
                cmd = command_rx.recv() => match cmd {
                    Some(SchedulerCommand::CheckNow) => {
                        if let Err(err) = self.run_next().await {
                            error!(error = %err, "Scheduling cycle failed");
                        }
                    }
                    Some(SchedulerCommand::Stop) => {
                        info!("Scheduler stopping");
                        break;
                    }
                    None => {
                        info!("Command channel closed, scheduler stopping");
                        break;
                    }
                },
                _ = poll.tick() => {
                    if let Err(err) = self.run_next().await {
                        error!(error = %err, "Scheduling cycle failed");
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// One scheduling cycle. Returns true if a task was executed.
    pub async fn run_next(&self) -> Result<bool> {
        if let Some(running) = self.queue.running()? {
            debug!(task_id = running.id, "A task is already running, skipping pick");
            return Ok(false);
        }

        let task = match self.queue.next_retryable()? {
            Some(task) => task,
            None => return Ok(false),
        };

        info!(
            task_id = task.id,
            priority = task.priority.as_str(),
            retry_count = task.retry_count,
            "Picked task"
        );
        self.execute(task).await?;
        Ok(true)
    }

    async fn execute(&self, task: Task) -> Result<()> {
        self.sink.emit(TaskEvent::started(task.clone())).await;

        let task_budget = self.executor.config().task_timeout;
        let result = match tokio::time::timeout(task_budget, self.executor.run_task(&task)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "Task timed out after {} ms",
                task_budget.as_millis()
            )),
        };

        match result {
            Ok(output) => {
                self.queue.set_done(task.id, &output)?;
                info!(task_id = task.id, "Task completed");
                let snapshot = self.snapshot(&task)?;
                self.sink.emit(TaskEvent::completed(snapshot, output)).await;
                Ok(())
            }
            Err(err) => self.handle_failure(&task, err).await,
        }
    }

    async fn handle_failure(&self, task: &Task, err: anyhow::Error) -> Result<()> {
        let message = normalize_error_text(&err.to_string());
        let kind = classify(&message);
        warn!(
            task_id = task.id,
            kind = kind.as_str(),
            error = %message,
            "Task execution failed"
        );

        // A conversation left with dangling tool calls can be repaired in
        // place; a successful repair costs no retry.
        if kind == ErrorKind::ToolResultMissing && self.try_tool_result_recovery(task).await {
            self.queue.reset_to_pending(task.id)?;
            info!(task_id = task.id, "Repaired dangling tool calls, task stays pending");
            return Ok(());
        }

        if kind.is_permanent() {
            return self.fail_permanently(task, &message, kind).await;
        }

        let delay_secs = match kind {
            ErrorKind::RateLimit => {
                retry_after_hint(&message).unwrap_or_else(|| backoff_delay_secs(task.retry_count))
            }
            _ => backoff_delay_secs(task.retry_count),
        };

        if self.queue.schedule_retry(task.id, delay_secs)? {
            info!(
                task_id = task.id,
                delay_secs,
                retry = task.retry_count + 1,
                max_retries = task.max_retries,
                "Scheduled retry"
            );
            let snapshot = self.snapshot(task)?;
            self.sink.emit(TaskEvent::failed(snapshot, message)).await;
            Ok(())
        } else {
            self.fail_permanently(task, &message, kind).await
        }
    }

    async fn fail_permanently(&self, task: &Task, message: &str, kind: ErrorKind) -> Result<()> {
        self.queue.set_failed(task.id, message, kind)?;
        let cascaded = self
            .queue
            .fail_dependent_tasks(task.id, &format!("Parent task #{} failed", task.id))?;
        if cascaded > 0 {
            info!(task_id = task.id, cascaded, "Failed dependent tasks");
        }
        error!(
            task_id = task.id,
            kind = kind.as_str(),
            "Task failed permanently"
        );
        let snapshot = self.snapshot(task)?;
        self.sink
            .emit(TaskEvent::failed(snapshot, message.to_string()))
            .await;
        Ok(())
    }

    /// Ask the runner to synthesize results for tool calls the transcript
    /// left unanswered. Returns true only if the session was repaired.
    async fn try_tool_result_recovery(&self, task: &Task) -> bool {
        let fresh = match self.queue.get(task.id) {
            Ok(Some(fresh)) => fresh,
            _ => return false,
        };
        let session_id = match fresh.session_id.as_deref() {
            Some(id) => id.to_string(),
            None => return false,
        };

        let work_dir = self.executor.config().work_dir_for(&fresh);
        let messages = match self.runner.messages(&session_id, &work_dir).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!(task_id = task.id, error = %err, "Could not fetch transcript for repair");
                return false;
            }
        };

        let pending = pending_tool_ids(&messages);
        if pending.is_empty() {
            return false;
        }

        match self
            .runner
            .inject_tool_results(&session_id, &work_dir, &pending)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(task_id = task.id, error = %err, "Tool result injection failed");
                false
            }
        }
    }

    /// Fresh row for event snapshots; falls back to the picked copy if the
    /// row vanished.
    fn snapshot(&self, task: &Task) -> Result<Task> {
        Ok(self.queue.get(task.id)?.unwrap_or_else(|| task.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{TaskEventKind, TaskObserver};
    use crate::models::{
        AgentMessage, MessagePart, NewTask, TaskPriority, TaskStatus,
    };
    use crate::runtime::testkit::MockRunner;
    use crate::storage::Database;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct RecordingObserver {
        events: Mutex<Vec<TaskEventKind>>,
    }

    #[async_trait]
    impl TaskObserver for RecordingObserver {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn notify(&self, event: &TaskEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.kind);
            Ok(())
        }
    }

    fn fast_executor_config() -> ExecutorConfig {
        ExecutorConfig {
            iteration_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
            session_warmup: Duration::from_millis(0),
            stability_window: Duration::from_millis(0),
            ..Default::default()
        }
    }

    fn setup(
        runner: Arc<MockRunner>,
    ) -> (Arc<Scheduler>, TaskQueueStorage, Arc<RecordingObserver>) {
        let queue = TaskQueueStorage::new(Database::open_in_memory().unwrap());
        let observer = Arc::new(RecordingObserver {
            events: Mutex::new(Vec::new()),
        });
        let mut sink = EventSink::new();
        sink.register(observer.clone());
        let scheduler = Arc::new(Scheduler::new(
            queue.clone(),
            runner,
            Arc::new(sink),
            fast_executor_config(),
            Duration::from_millis(10),
        ));
        (scheduler, queue, observer)
    }

    fn complete_messages() -> Vec<AgentMessage> {
        vec![AgentMessage::assistant(vec![MessagePart::Text {
            text: "[TASK_COMPLETE] done".into(),
        }])]
    }

    #[tokio::test]
    async fn picks_highest_priority_task_first() {
        let runner = Arc::new(MockRunner::new());
        runner.push_messages(complete_messages());
        let (scheduler, queue, _) = setup(runner);

        let mut low = NewTask::new("Low");
        low.priority = TaskPriority::Low;
        queue.create(low).unwrap();
        let mut urgent = NewTask::new("Urgent");
        urgent.priority = TaskPriority::Urgent;
        let urgent = queue.create(urgent).unwrap();
        let mut high = NewTask::new("High");
        high.priority = TaskPriority::High;
        queue.create(high).unwrap();

        assert!(scheduler.run_next().await.unwrap());

        let done = queue.get(urgent.id).unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(queue.stats().unwrap().pending, 2);
    }

    #[tokio::test]
    async fn completed_task_emits_started_then_completed() {
        let runner = Arc::new(MockRunner::new());
        runner.push_messages(complete_messages());
        let (scheduler, queue, observer) = setup(runner);

        queue.create(NewTask::new("emit events")).unwrap();
        scheduler.run_next().await.unwrap();

        let events = observer.events.lock().unwrap().clone();
        assert_eq!(events, vec![TaskEventKind::Started, TaskEventKind::Completed]);
    }

    #[tokio::test]
    async fn skips_when_a_task_is_already_running() {
        let runner = Arc::new(MockRunner::new());
        let (scheduler, queue, _) = setup(runner);

        let occupying = queue.create(NewTask::new("already going")).unwrap();
        queue.set_running(occupying.id, "sess-live").unwrap();
        queue.create(NewTask::new("waiting")).unwrap();

        assert!(!scheduler.run_next().await.unwrap());
        assert_eq!(queue.stats().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn timeout_failure_schedules_retry_with_backoff() {
        let runner = Arc::new(MockRunner::new());
        runner.fail_next_send("request timed out");
        let (scheduler, queue, observer) = setup(runner);

        let task = queue.create(NewTask::new("flaky")).unwrap();
        let before = Utc::now().timestamp_millis();
        scheduler.run_next().await.unwrap();

        let state = queue.get(task.id).unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Pending);
        assert_eq!(state.retry_count, 1);
        let retry_after = state.retry_after.unwrap();
        // First retry backs off 30 seconds.
        assert!(retry_after >= before + 29_000 && retry_after <= before + 31_000);

        let events = observer.events.lock().unwrap().clone();
        assert_eq!(events, vec![TaskEventKind::Started, TaskEventKind::Failed]);
    }

    #[tokio::test]
    async fn backoff_doubles_per_consumed_retry() {
        let runner = Arc::new(MockRunner::new());
        let (scheduler, queue, _) = setup(runner);
        let task = queue.create(NewTask::new("repeat offender")).unwrap();

        // Failures two and three arrive with retry_count already at 1 and 2.
        for (consumed, expected_secs) in [(0u32, 30i64), (1, 60), (2, 120)] {
            let snapshot = queue.get(task.id).unwrap().unwrap();
            assert_eq!(snapshot.retry_count, consumed);
            let before = Utc::now().timestamp_millis();
            scheduler
                .handle_failure(&snapshot, anyhow!("request timed out"))
                .await
                .unwrap();
            let state = queue.get(task.id).unwrap().unwrap();
            let retry_after = state.retry_after.unwrap();
            assert!(
                retry_after >= before + (expected_secs - 1) * 1_000
                    && retry_after <= before + (expected_secs + 1) * 1_000,
                "unexpected delay for retry {}",
                consumed + 1
            );
        }

        // Fourth failure exceeds max_retries=3 and becomes permanent.
        let snapshot = queue.get(task.id).unwrap().unwrap();
        assert_eq!(snapshot.retry_count, 3);
        scheduler
            .handle_failure(&snapshot, anyhow!("request timed out"))
            .await
            .unwrap();
        let state = queue.get(task.id).unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        assert_eq!(state.error_type, Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn rate_limit_retry_after_hint_overrides_backoff() {
        let runner = Arc::new(MockRunner::new());
        let (scheduler, queue, _) = setup(runner);
        let task = queue.create(NewTask::new("throttled")).unwrap();

        let before = Utc::now().timestamp_millis();
        scheduler
            .handle_failure(&task, anyhow!("rate limit exceeded, retry after 45 seconds"))
            .await
            .unwrap();

        let state = queue.get(task.id).unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Pending);
        let retry_after = state.retry_after.unwrap();
        assert!(retry_after >= before + 44_000 && retry_after <= before + 46_000);
    }

    #[tokio::test]
    async fn context_exceeded_fails_without_retry() {
        let runner = Arc::new(MockRunner::new());
        runner.fail_next_send("context length exceeded");
        let (scheduler, queue, _) = setup(runner);

        let task = queue.create(NewTask::new("too big")).unwrap();
        scheduler.run_next().await.unwrap();

        let state = queue.get(task.id).unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        assert_eq!(state.error_type, Some(ErrorKind::ContextExceeded));
        assert_eq!(state.retry_count, 0);
        assert!(state.retry_after.is_none());
    }

    #[tokio::test]
    async fn json_shaped_errors_are_normalized_before_classification() {
        let runner = Arc::new(MockRunner::new());
        runner.fail_next_send(r#"{"error": {"message": "context window exceeded"}}"#);
        let (scheduler, queue, _) = setup(runner);

        let task = queue.create(NewTask::new("nested error")).unwrap();
        scheduler.run_next().await.unwrap();

        let state = queue.get(task.id).unwrap().unwrap();
        assert_eq!(state.error_type, Some(ErrorKind::ContextExceeded));
    }

    #[tokio::test]
    async fn tool_result_missing_recovers_without_consuming_a_retry() {
        let runner = Arc::new(MockRunner::new());
        // The transcript carries a dangling tool call the runner can repair.
        runner.push_messages(vec![AgentMessage::assistant(vec![MessagePart::ToolUse {
            id: "t-9".into(),
            name: "bash".into(),
        }])]);
        runner.fail_next_send("missing tool_result for tool_use id t-9");
        let (scheduler, queue, _) = setup(runner.clone());

        let task = queue.create(NewTask::new("dangling tool call")).unwrap();
        scheduler.run_next().await.unwrap();

        let state = queue.get(task.id).unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Pending);
        assert_eq!(state.retry_count, 0);
        assert!(state.retry_after.is_none());

        let injections = runner.injected_tool_results();
        assert_eq!(injections.len(), 1);
        assert_eq!(injections[0].1, vec!["t-9".to_string()]);
    }

    #[tokio::test]
    async fn tool_result_recovery_falls_back_to_retry_when_nothing_pending() {
        let runner = Arc::new(MockRunner::new());
        // Transcript has no dangling calls, so the repair cannot apply.
        runner.push_messages(complete_messages());
        runner.fail_next_send("bad tool_use without tool_result pairing");
        let (scheduler, queue, _) = setup(runner.clone());

        let task = queue.create(NewTask::new("unrepairable")).unwrap();
        scheduler.run_next().await.unwrap();

        let state = queue.get(task.id).unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Pending);
        assert_eq!(state.retry_count, 1);
        assert!(runner.injected_tool_results().is_empty());
    }

    #[tokio::test]
    async fn task_budget_overrun_is_classified_as_timeout() {
        let runner = Arc::new(MockRunner::new());
        runner.always_busy();
        runner.grow_transcript_forever();

        let queue = TaskQueueStorage::new(Database::open_in_memory().unwrap());
        let config = ExecutorConfig {
            task_timeout: Duration::from_millis(50),
            ..fast_executor_config()
        };
        let scheduler = Scheduler::new(
            queue.clone(),
            runner,
            Arc::new(EventSink::new()),
            config,
            Duration::from_millis(10),
        );

        let task = queue.create(NewTask::new("never settles")).unwrap();
        scheduler.run_next().await.unwrap();

        let state = queue.get(task.id).unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Pending);
        assert_eq!(state.retry_count, 1);
    }

    #[tokio::test]
    async fn permanent_parent_failure_cascades_to_children() {
        let runner = Arc::new(MockRunner::new());
        runner.fail_next_send("agent 'builder' not found");
        let (scheduler, queue, _) = setup(runner);

        let parent = queue.create(NewTask::new("parent")).unwrap();
        let mut child_new = NewTask::new("child");
        child_new.depends_on = Some(parent.id);
        let child = queue.create(child_new).unwrap();

        scheduler.run_next().await.unwrap();

        let parent_state = queue.get(parent.id).unwrap().unwrap();
        assert_eq!(parent_state.status, TaskStatus::Failed);
        assert_eq!(parent_state.error_type, Some(ErrorKind::AgentNotFound));

        let child_state = queue.get(child.id).unwrap().unwrap();
        assert_eq!(child_state.status, TaskStatus::Failed);
        assert_eq!(child_state.error_type, Some(ErrorKind::DependencyFailed));
    }

    #[tokio::test]
    async fn dependency_gating_orders_parent_before_child() {
        let runner = Arc::new(MockRunner::new());
        runner.push_messages(complete_messages());
        let (scheduler, queue, _) = setup(runner);

        let parent = queue.create(NewTask::new("parent work")).unwrap();
        let mut child_new = NewTask::new("child work");
        child_new.priority = TaskPriority::Urgent;
        child_new.depends_on = Some(parent.id);
        let child = queue.create(child_new).unwrap();

        // First cycle must run the parent despite the child's priority.
        assert!(scheduler.run_next().await.unwrap());
        assert_eq!(
            queue.get(parent.id).unwrap().unwrap().status,
            TaskStatus::Done
        );

        // Now the child is eligible.
        assert!(scheduler.run_next().await.unwrap());
        assert_eq!(
            queue.get(child.id).unwrap().unwrap().status,
            TaskStatus::Done
        );
    }

    #[tokio::test]
    async fn start_and_stop_round_trip() {
        let runner = Arc::new(MockRunner::new());
        let (scheduler, _, _) = setup(runner);

        let handle = scheduler.start();
        handle.check_now().await.unwrap();
        handle.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn startup_recovers_orphaned_running_task() {
        let runner = Arc::new(MockRunner::new());
        runner.push_messages(complete_messages());
        let (scheduler, queue, _) = setup(runner);

        let orphan = queue.create(NewTask::new("orphaned by crash")).unwrap();
        queue.set_running(orphan.id, "sess-from-dead-process").unwrap();

        let handle = scheduler.clone().start();
        // Give the loop a moment to recover and execute the orphan.
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop(Duration::from_secs(2)).await.unwrap();

        let state = queue.get(orphan.id).unwrap().unwrap();
        assert_ne!(state.status, TaskStatus::Running);
    }
}
