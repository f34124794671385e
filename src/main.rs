//! statesync: whole-file replication of a local state file
//!
//! Usage:
//!   statesync sync            one attempt against the configured remote
//!   statesync run             periodic sync until Ctrl-C
//!   statesync status          last recorded outcome
//!   statesync serve           HTTP blob server for the http transport
//!   statesync reset           delete settings and sync bookkeeping

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use statesync::config::{AppConfig, ConfigWatcher, SyncConfig};
use statesync::fs::{DefaultConnector, LocalStateFile};
use statesync::server::SyncServer;
use statesync::sync::{
    AttemptResult, Scheduler, StateStore, SyncEngine, SyncEvent, SyncOutcome, SyncReport,
};

/// Upper bound on waiting for an in-flight attempt at exit
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "statesync")]
#[command(about = "Replicate a local state file over HTTP, FTP or S3")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync attempt now
    Sync,
    /// Sync periodically, reloading settings when the file changes
    Run,
    /// Show the last recorded sync outcome
    Status,
    /// Serve the single-blob store used by the http transport
    Serve {
        /// Override `server.listen`
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },
    /// Delete the settings file and all sync bookkeeping
    Reset {
        /// Confirm that everything should be deleted
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };

    match cli.command {
        Command::Sync => run_once(&config_path).await,
        Command::Run => run_scheduler(&config_path).await,
        Command::Status => show_status(&config_path).await,
        Command::Serve { listen } => serve(&config_path, listen).await,
        Command::Reset { yes } => reset(&config_path, yes).await,
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Ctrl-C listener, registered as soon as it is created so that a signal
/// arriving during the first attempt is not lost.
struct Interrupt {
    #[cfg(unix)]
    inner: tokio::signal::unix::Signal,
    #[cfg(windows)]
    inner: tokio::signal::windows::CtrlC,
}

impl Interrupt {
    fn install() -> Result<Self> {
        #[cfg(unix)]
        let inner = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt());
        #[cfg(windows)]
        let inner = tokio::signal::windows::ctrl_c();

        Ok(Self {
            inner: inner.context("Failed to install Ctrl-C handler")?,
        })
    }

    async fn recv(&mut self) {
        let _ = self.inner.recv().await;
    }
}

fn sync_section(config: &AppConfig, path: &Path) -> Result<SyncConfig> {
    config
        .sync
        .clone()
        .with_context(|| format!("No [sync] section in {}", path.display()))
}

fn build_engine(config: &AppConfig) -> Result<Arc<SyncEngine>> {
    Ok(Arc::new(SyncEngine::new(
        LocalStateFile::new(&config.database),
        StateStore::new(config.state_dir()?),
        Arc::new(DefaultConnector),
    )))
}

async fn run_once(config_path: &Path) -> Result<()> {
    let mut interrupt = Interrupt::install()?;
    let config = AppConfig::load(config_path)?;
    let sync = sync_section(&config, config_path)?;
    let engine = build_engine(&config)?;

    let attempt = engine.sync(&sync);
    tokio::pin!(attempt);
    let outcome = tokio::select! {
        outcome = &mut attempt => outcome,
        _ = interrupt.recv() => {
            warn!("interrupted, waiting for the running attempt to finish");
            tokio::time::timeout(SHUTDOWN_TIMEOUT, attempt)
                .await
                .context("sync attempt still running at shutdown deadline")?
        }
    };

    match outcome {
        SyncOutcome::Completed(report) => {
            print_report(&report);
            if matches!(
                report.result,
                AttemptResult::Success | AttemptResult::Skipped
            ) {
                Ok(())
            } else {
                bail!("sync failed: {}", report.error.as_deref().unwrap_or("unknown error"))
            }
        }
        SyncOutcome::AlreadyRunning => {
            println!("{}", "A sync attempt is already running".yellow());
            Ok(())
        }
    }
}

async fn run_scheduler(config_path: &Path) -> Result<()> {
    let mut interrupt = Interrupt::install()?;
    let config = AppConfig::load(config_path)?;
    let sync = sync_section(&config, config_path)?;
    let engine = build_engine(&config)?;

    if !sync.enabled {
        warn!("sync is disabled in settings; waiting for it to be enabled");
    }
    info!(
        remote = %sync.transport.remote_id(),
        every = ?sync.interval(),
        policy = sync.conflict_policy.description(),
        "scheduler started"
    );

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::Reloaded { fingerprint }) => {
                    info!(hash = fingerprint.short_hash(), "local state replaced, reload required");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let scheduler = Scheduler::spawn(engine, sync.clone());
    if sync.enabled {
        scheduler.request_sync();
    }

    let mut watcher = match ConfigWatcher::new(config_path) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!("Settings will not be reloaded: {err:#}");
            None
        }
    };

    loop {
        tokio::select! {
            _ = interrupt.recv() => {
                info!("shutting down");
                break;
            }
            Some(()) = next_change(&mut watcher) => {
                reload(config_path, &config, &scheduler);
            }
        }
    }

    if !scheduler.shutdown(SHUTDOWN_TIMEOUT).await {
        warn!("exiting with a sync attempt still in flight");
    }
    Ok(())
}

async fn next_change(watcher: &mut Option<ConfigWatcher>) -> Option<()> {
    match watcher {
        Some(watcher) => watcher.changed().await,
        None => std::future::pending().await,
    }
}

/// Hand a fresh snapshot to the scheduler; keep the old one if the edit is bad.
fn reload(path: &Path, started_with: &AppConfig, scheduler: &Scheduler) {
    let config = match AppConfig::load(path) {
        Ok(config) => config,
        Err(err) => {
            warn!("Ignoring settings change: {err:#}");
            return;
        }
    };
    if config.database != started_with.database {
        warn!("database path changes take effect after a restart");
    }

    match config.sync {
        Some(sync) if sync != scheduler.config() => {
            info!(
                enabled = sync.enabled,
                every = ?sync.interval(),
                "sync settings reloaded"
            );
            scheduler.update_config(sync);
        }
        Some(_) => debug!("settings touched, sync section unchanged"),
        None => warn!("[sync] section removed; keeping previous settings"),
    }
}

async fn show_status(config_path: &Path) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let sync = sync_section(&config, config_path)?;
    let engine = build_engine(&config)?;
    let state = engine.status(&sync).await?;

    println!("{}", "Sync status".bold());
    println!("  Remote:    {}", state.remote_id.cyan());
    println!("  Policy:    {}", sync.conflict_policy.description());
    println!(
        "  Schedule:  {}",
        if sync.enabled {
            format!("every {}s", sync.interval_seconds).normal()
        } else {
            "disabled".yellow()
        }
    );

    match std::fs::metadata(&config.database) {
        Ok(meta) => println!(
            "  Local:     {} ({})",
            config.database.display(),
            humansize::format_size(meta.len(), humansize::BINARY)
        ),
        Err(_) => println!("  Local:     {} {}", config.database.display(), "(missing)".yellow()),
    }

    match state.last_attempt_at {
        Some(at) => println!("  Last run:  {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last run:  {}", "never".dimmed()),
    }
    if let Some(result) = state.last_result {
        let action = state
            .last_action
            .map(|a| format!(" ({a})"))
            .unwrap_or_default();
        let line = format!("{result}{action}");
        let line = match result {
            AttemptResult::Success => line.green(),
            AttemptResult::Skipped => line.normal(),
            _ => line.red(),
        };
        println!("  Result:    {line}");
    }
    if let Some(message) = &state.last_error_message {
        println!("  Error:     {}", message.red());
    }
    if let Some(fingerprint) = &state.last_synced_fingerprint {
        println!(
            "  Agreed on: {} ({})",
            fingerprint.short_hash(),
            humansize::format_size(fingerprint.size_bytes, humansize::BINARY)
        );
    }
    Ok(())
}

async fn serve(config_path: &Path, listen: Option<SocketAddr>) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let server_config = config
        .server
        .with_context(|| format!("No [server] section in {}", config_path.display()))?;
    let addr = listen.unwrap_or(server_config.listen);

    let server = SyncServer::open(&server_config).await?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
}

async fn reset(config_path: &Path, yes: bool) -> Result<()> {
    if !yes {
        bail!("reset deletes all settings and sync history; re-run with --yes");
    }

    // Bookkeeping location comes from the settings, if they still parse
    let state_dir = match AppConfig::load(config_path) {
        Ok(config) => config.state_dir()?,
        Err(err) => {
            debug!("settings unreadable, using default state dir: {err:#}");
            AppConfig::default_state_dir()?
        }
    };

    let removed = StateStore::new(&state_dir).clear().await?;
    match std::fs::remove_file(config_path) {
        Ok(()) => println!("{} {}", "Deleted".green(), config_path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to delete {}", config_path.display()))
        }
    }
    println!("{} {} sync record(s)", "Cleared".green(), removed);
    Ok(())
}

fn print_report(report: &SyncReport) {
    let action = report
        .action
        .map(|a| a.to_string())
        .unwrap_or_else(|| "-".to_string());
    match report.result {
        AttemptResult::Success => println!(
            "{} {} ({}, {} ms)",
            "✓".green(),
            action,
            humansize::format_size(report.bytes_transferred, humansize::BINARY),
            report.duration_ms
        ),
        AttemptResult::Skipped => println!("{} nothing to sync on either side", "-".dimmed()),
        result => println!(
            "{} {}: {}",
            "✗".red(),
            result,
            report.error.as_deref().unwrap_or("")
        ),
    }
}
