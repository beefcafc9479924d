//! taskd-core — the task lifecycle engine behind the taskd daemon.
//!
//! A single-host daemon accepts free-form natural-language tasks, queues
//! them durably in SQLite, and executes them one at a time by driving an
//! external conversational coding agent to completion. This crate holds
//! the whole engine: the durable priority queue with dependency and retry
//! scheduling, the iterative executor with its multi-signal completion
//! detector, the error classifier and retry policy, the scheduling loop,
//! the event sink, and the single-instance lifecycle pieces. Ingress
//! adapters (bots, CLI) enqueue through [`storage::TaskQueueStorage`] and
//! observe through [`events::EventSink`].

pub mod config;
pub mod daemon;
pub mod events;
pub mod models;
pub mod paths;
pub mod runtime;
pub mod storage;

pub use config::Config;
pub use events::{ConsoleObserver, EventSink, TaskEvent, TaskEventKind, TaskObserver};
pub use models::{NewTask, Task, TaskPriority, TaskSource, TaskStatus};
pub use runtime::{
    AgentRunner, CliAgentRunner, ErrorKind, ExecutorConfig, HttpAgentRunner, Scheduler,
    SchedulerHandle, TaskExecutor,
};
pub use storage::{Database, ProgressUpdate, QueueStats, TaskQueueStorage};
