//! Task execution runtime: the runner abstraction, the per-task executor,
//! the scheduling loop, and the failure policy around them.

pub mod cli_runner;
pub mod executor;
pub mod http_runner;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod signals;
#[cfg(test)]
pub mod testkit;

pub use cli_runner::CliAgentRunner;
pub use executor::{initial_prompt, ExecutorConfig, IterationOutcome, TaskExecutor};
pub use http_runner::HttpAgentRunner;
pub use retry::{backoff_delay_secs, classify, normalize_error_text, ErrorKind};
pub use runner::{pending_tool_ids, AgentRunner};
pub use scheduler::{Scheduler, SchedulerCommand, SchedulerHandle};
