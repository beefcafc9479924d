mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, DaemonCommands};
use taskd_core::paths;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging always goes to the data-dir log file; the console stays
    // reserved for command output.
    let log_dir = paths::logs_dir()?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "taskd.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_env_filter(level)
        .init();

    match cli.command {
        Commands::Daemon { command } => match command {
            DaemonCommands::Start {
                foreground,
                server_url,
                agent_bin,
            } => commands::daemon::start(foreground, server_url, agent_bin).await,
            DaemonCommands::Stop => commands::daemon::stop().await,
            DaemonCommands::Status => commands::daemon::status().await,
        },
        Commands::Add(args) => commands::task::add(args, cli.format),
        Commands::List(args) => commands::task::list(args, cli.format),
        Commands::Show { id } => commands::task::show(id, cli.format),
        Commands::Cancel { id } => commands::task::cancel(id, cli.format),
        Commands::Stats => commands::task::stats(cli.format),
    }
}
