//! Daemon lifecycle commands: foreground run loop, detach, stop, status.

use anyhow::Result;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use taskd_core::daemon::{check_status, DaemonStatus, InstanceLock};
use taskd_core::events::{ConsoleObserver, EventSink};
use taskd_core::runtime::{AgentRunner, CliAgentRunner, ExecutorConfig, HttpAgentRunner, Scheduler};
use taskd_core::storage::{Database, TaskQueueStorage};
use taskd_core::{paths, Config};

pub async fn start(foreground: bool, server_url: Option<String>, agent_bin: String) -> Result<()> {
    if foreground {
        run_foreground(server_url, agent_bin).await
    } else {
        match check_status(&paths::lock_path()?)? {
            DaemonStatus::Running { pid } => {
                println!("Daemon already running (PID: {})", pid);
                Ok(())
            }
            _ => {
                let pid = spawn_background(server_url, agent_bin)?;
                println!("Daemon started (PID: {})", pid);
                Ok(())
            }
        }
    }
}

/// The daemon proper: lock, open the store, run the scheduler until a stop
/// signal, then give the in-flight task its grace period.
async fn run_foreground(server_url: Option<String>, agent_bin: String) -> Result<()> {
    let config = Config::from_env()?;
    let mut lock = InstanceLock::acquire(&paths::lock_path()?)?;

    let db = Database::open(&paths::database_path()?)?;
    let queue = TaskQueueStorage::new(db);

    let runner: Arc<dyn AgentRunner> = match server_url {
        Some(url) => {
            info!(url = %url, "Using agent server runner");
            Arc::new(HttpAgentRunner::new(url)?)
        }
        None => {
            info!(binary = %agent_bin, "Using agent CLI runner");
            Arc::new(CliAgentRunner::new(agent_bin))
        }
    };

    let mut sink = EventSink::new();
    sink.register(Arc::new(ConsoleObserver));

    let scheduler = Arc::new(Scheduler::new(
        queue,
        runner,
        Arc::new(sink),
        ExecutorConfig::from_config(&config),
        config.poll_interval,
    ));
    let handle = scheduler.start();

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    spawn_signal_listener(shutdown_tx.clone());

    println!("taskd running. Press Ctrl+C to stop.");
    let _ = shutdown_rx.recv().await;
    info!("Shutdown signal received, draining in-flight task");

    // A second signal skips the grace period entirely.
    tokio::spawn(async move {
        wait_for_stop_signal().await;
        eprintln!("Force shutdown");
        std::process::exit(130);
    });

    match handle.stop(config.shutdown_timeout).await {
        Ok(()) => info!("Scheduler drained"),
        Err(err) => {
            // The orphaned task will be reset to pending on next start.
            warn!(error = %err, "Exiting with a task still in flight");
        }
    }

    lock.release();
    println!("taskd stopped");
    Ok(())
}

fn spawn_signal_listener(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        wait_for_stop_signal().await;
        let _ = shutdown_tx.send(());
    });
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!(error = %err, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Detach: re-exec ourselves with `daemon start --foreground`.
fn spawn_background(server_url: Option<String>, agent_bin: String) -> Result<u32> {
    let exe = std::env::current_exe()?;
    let mut cmd = Command::new(&exe);
    cmd.args(["daemon", "start", "--foreground", "--agent-bin", &agent_bin]);
    if let Some(url) = server_url {
        cmd.args(["--server-url", &url]);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(std::io::Error::other)
            });
        }
    }

    let child = cmd.spawn()?;
    Ok(child.id())
}

pub async fn stop() -> Result<()> {
    match check_status(&paths::lock_path()?)? {
        DaemonStatus::Running { pid } => {
            send_term(pid)?;
            println!("Sent stop signal to daemon (PID: {})", pid);
        }
        DaemonStatus::NotRunning => println!("Daemon not running"),
        DaemonStatus::Stale { pid } => {
            println!("Daemon not running (stale PID: {})", pid);
        }
    }
    Ok(())
}

pub async fn status() -> Result<()> {
    match check_status(&paths::lock_path()?)? {
        DaemonStatus::Running { pid } => println!("Daemon running (PID: {})", pid),
        DaemonStatus::NotRunning => println!("Daemon not running"),
        DaemonStatus::Stale { pid } => {
            println!("Daemon not running (stale PID: {})", pid);
            println!("  Hint: the next `taskd daemon start` will clean the lock file");
        }
    }
    Ok(())
}

#[cfg(unix)]
fn send_term(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)?;
    Ok(())
}

#[cfg(not(unix))]
fn send_term(pid: u32) -> Result<()> {
    Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .output()?;
    Ok(())
}
