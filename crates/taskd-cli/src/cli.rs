use clap::{Args, Parser, Subcommand, ValueEnum};
use taskd_core::models::{TaskPriority, TaskStatus};

/// Output format for CLI commands
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PriorityArg {
    Urgent,
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for TaskPriority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Urgent => TaskPriority::Urgent,
            PriorityArg::High => TaskPriority::High,
            PriorityArg::Medium => TaskPriority::Medium,
            PriorityArg::Low => TaskPriority::Low,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum StatusArg {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl From<StatusArg> for TaskStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => TaskStatus::Pending,
            StatusArg::Running => TaskStatus::Running,
            StatusArg::Done => TaskStatus::Done,
            StatusArg::Failed => TaskStatus::Failed,
            StatusArg::Cancelled => TaskStatus::Cancelled,
        }
    }
}

#[derive(Parser)]
#[command(name = "taskd")]
#[command(version, about = "taskd - durable task queue daemon for coding agents")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the taskd daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Queue a new task
    Add(AddArgs),

    /// List queued tasks
    List(ListArgs),

    /// Show one task in full
    Show {
        /// Task id
        id: i64,
    },

    /// Cancel a pending task
    Cancel {
        /// Task id
        id: i64,
    },

    /// Show queue statistics
    Stats,
}

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Start the daemon
    Start {
        /// Run in the foreground instead of detaching
        #[arg(long)]
        foreground: bool,

        /// Base URL of a local agent server; enables the in-process runner
        #[arg(long, env = "TASKD_SERVER_URL")]
        server_url: Option<String>,

        /// Agent CLI binary used when no server URL is configured
        #[arg(long, env = "TASKD_AGENT_BIN", default_value = "agent")]
        agent_bin: String,
    },

    /// Stop a running daemon
    Stop,

    /// Report daemon status
    Status,
}

#[derive(Args)]
pub struct AddArgs {
    /// The task prompt (joined with spaces)
    #[arg(required = true)]
    pub prompt: Vec<String>,

    /// Queue priority
    #[arg(long, value_enum, default_value = "medium")]
    pub priority: PriorityArg,

    /// Working directory override for this task
    #[arg(long)]
    pub project: Option<String>,

    /// Id of a task that must be done before this one runs
    #[arg(long)]
    pub depends_on: Option<i64>,

    /// Cap on continuation rounds
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Cap on retries
    #[arg(long)]
    pub max_retries: Option<u32>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only show tasks in this status
    #[arg(long, value_enum)]
    pub status: Option<StatusArg>,

    /// Maximum number of rows
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}
