pub mod runner;
pub mod task;

pub use runner::{AgentMessage, MessagePart, MessageRole, SessionStatus, Todo, TodoStatus};
pub use task::{
    validate_prompt, NewTask, Task, TaskPriority, TaskSource, TaskStatus, DEFAULT_MAX_ITERATIONS,
    DEFAULT_MAX_RETRIES, MAX_PROMPT_LEN,
};
