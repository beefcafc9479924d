//! Persistence layer: an embedded SQLite database with WAL journaling and
//! the queue operations over the task table.

mod db;
mod schema;
mod task_queue;

pub use db::Database;
pub use task_queue::{ProgressUpdate, QueueStats, TaskQueueStorage};
