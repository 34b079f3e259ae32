//! PTM Daemon - Game playtime tracker
//!
//! This binary runs as a background daemon, polling the process list,
//! detecting running games from the catalog, and recording playtime.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! ptmd start
//!
//! # Start the daemon (background/daemonized)
//! ptmd start -d
//!
//! # Stop the daemon
//! ptmd stop
//!
//! # Check daemon status
//! ptmd status
//!
//! # Use a custom config file
//! PTM_CONFIG=/etc/ptm.toml ptmd start
//!
//! # Enable debug logging
//! RUST_LOG=ptmd=debug ptmd start
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ptmd::catalog::FileCatalog;
use ptmd::config::{config_file_path, DaemonConfig, APP_DIR};
use ptmd::ledger::LedgerHandle;
use ptmd::monitor::{spawn_monitor_task, MonitorSettings, PlaytimeMonitor};
use ptmd::report::spawn_report_task;
use ptmd::snapshot::SysinfoSnapshotSource;
use ptmd::store::LedgerStore;

/// PTM daemon - game playtime tracker
#[derive(Parser, Debug)]
#[command(name = "ptmd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
}

fn pid_file_path() -> PathBuf {
    state_dir().join("ptmd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("ptmd.log")
}

fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'ptmd stop' to stop it first.");
                process::exit(1);
            }

            // Fail on a broken config before forking so the error is visible.
            let config = DaemonConfig::load().with_context(|| {
                format!("Failed to load config {}", config_file_path().display())
            })?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(config);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                // Shutdown closes open sessions and flushes, allow for slow disks.
                for _ in 0..100 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 10 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                if let Ok(config) = DaemonConfig::load() {
                    println!("Ledger: {}", config.ledger_path.display());
                    println!("Catalog: {}", config.catalog_path.display());
                }
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ptmd=info".parse()?)
                .add_directive("ptm_core=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "PTM daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let store = LedgerStore::new(&config.ledger_path);
    let initial = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.load_or_recover())
            .await
            .context("Ledger load task failed")?
    };
    let ledger = LedgerHandle::new(initial, config.week_mode);

    let monitor = PlaytimeMonitor::new(
        MonitorSettings::from(&config),
        config.blacklist.clone(),
        SysinfoSnapshotSource::new(),
        FileCatalog::new(&config.catalog_path),
        ledger.clone(),
        store,
    );

    let report_handle = spawn_report_task(ledger, monitor.subscribe(), cancel_token.clone());
    let monitor_handle = spawn_monitor_task(monitor, cancel_token);

    info!(
        ledger = %config.ledger_path.display(),
        catalog = %config.catalog_path.display(),
        "Playtime tracking started"
    );

    // The monitor finishes only after the shutdown flush.
    let monitor_result = monitor_handle.await;
    log_task_failure("monitor", &monitor_result);
    monitor_result?;
    log_task_failure("report", &report_handle.await);

    info!("PTM daemon stopped");
    Ok(())
}

/// Logs a task that panicked or was aborted. Returns true if it did.
fn log_task_failure(task: &str, result: &Result<(), JoinError>) -> bool {
    match result {
        Ok(()) => false,
        Err(e) => {
            error!(task, error = %e, "Task failed");
            true
        }
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
