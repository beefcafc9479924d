//! Queue commands: thin wrappers over the queue API.

use anyhow::Result;
use taskd_core::models::{NewTask, Task, TaskSource};
use taskd_core::paths;
use taskd_core::storage::{Database, TaskQueueStorage};

use crate::cli::{AddArgs, ListArgs, OutputFormat};

fn open_queue() -> Result<TaskQueueStorage> {
    let db = Database::open(&paths::database_path()?)?;
    Ok(TaskQueueStorage::new(db))
}

fn created_by() -> String {
    std::env::var("USER").unwrap_or_else(|_| "cli".to_string())
}

pub fn add(args: AddArgs, format: OutputFormat) -> Result<()> {
    let queue = open_queue()?;
    let task = queue.create(NewTask {
        prompt: args.prompt.join(" "),
        project_path: args.project,
        priority: args.priority.into(),
        created_by: created_by(),
        source: TaskSource::Cli,
        max_iterations: args.max_iterations,
        max_retries: args.max_retries,
        depends_on: args.depends_on,
    })?;

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        println!(
            "Queued task #{} ({} priority)",
            task.id,
            task.priority.as_str()
        );
    }
    Ok(())
}

pub fn list(args: ListArgs, format: OutputFormat) -> Result<()> {
    let queue = open_queue()?;
    let tasks = queue.list(args.status.map(Into::into), args.limit)?;

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("No tasks");
        return Ok(());
    }
    for task in tasks {
        println!(
            "#{:<5} {:<9} {:<7} {}",
            task.id,
            task.status.as_str(),
            task.priority.as_str(),
            preview(&task.prompt)
        );
    }
    Ok(())
}

pub fn show(id: i64, format: OutputFormat) -> Result<()> {
    let queue = open_queue()?;
    match queue.get(id)? {
        Some(task) => {
            if format.is_json() {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                print_task(&task);
            }
            Ok(())
        }
        None => {
            println!("Task #{} not found", id);
            Ok(())
        }
    }
}

pub fn cancel(id: i64, format: OutputFormat) -> Result<()> {
    let queue = open_queue()?;
    let cancelled = queue.cancel(id)?;
    if format.is_json() {
        println!("{}", serde_json::json!({ "id": id, "cancelled": cancelled }));
    } else if cancelled {
        println!("Cancelled task #{}", id);
    } else {
        println!("Task #{} is not pending; nothing to cancel", id);
    }
    Ok(())
}

pub fn stats(format: OutputFormat) -> Result<()> {
    let queue = open_queue()?;
    let stats = queue.stats()?;
    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "pending: {}  running: {}  done: {}  failed: {}  cancelled: {}  total: {}",
            stats.pending, stats.running, stats.done, stats.failed, stats.cancelled, stats.total
        );
    }
    Ok(())
}

fn print_task(task: &Task) {
    println!("Task #{}", task.id);
    println!("  status:     {}", task.status.as_str());
    println!("  priority:   {}", task.priority.as_str());
    println!("  source:     {}", task.source.as_str());
    println!("  created by: {}", task.created_by);
    println!("  prompt:     {}", preview(&task.prompt));
    if let Some(path) = &task.project_path {
        println!("  project:    {}", path);
    }
    if let Some(parent) = task.depends_on {
        println!("  depends on: #{}", parent);
    }
    println!(
        "  iterations: {}/{}  retries: {}/{}",
        task.iteration, task.max_iterations, task.retry_count, task.max_retries
    );
    if let Some(session) = &task.session_id {
        println!("  session:    {}", session);
    }
    if task.progress_tool_calls > 0 {
        let last_tool = task.progress_last_tool.as_deref().unwrap_or("-");
        println!(
            "  progress:   {} tool calls, last: {}",
            task.progress_tool_calls, last_tool
        );
    }
    if let Some(result) = &task.result {
        println!("  result:     {}", preview(result));
    }
    if let Some(error) = &task.error {
        let kind = task
            .error_type
            .map(|k| k.as_str())
            .unwrap_or("unknown");
        println!("  error:      [{}] {}", kind, preview(error));
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 80;
    let flattened: String = text
        .chars()
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    if flattened.chars().count() <= MAX {
        flattened
    } else {
        let cut: String = flattened.chars().take(MAX).collect();
        format!("{cut}…")
    }
}
