//! # Ghost Daemon
//!
//! Desktop-companion runtime daemon. Hosts the ghost dispatch loop and
//! exposes it over two Unix sockets:
//!
//! - a request socket speaking the SHIORI/3.0 wire format
//! - a render socket streaming presentation commands as JSON lines
//!
//! One pid file guards against double-starts; SIGINT/SIGTERM trigger a
//! graceful shutdown that delivers a final OnClose to the ghost.

mod server;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use ghost_core::GhostConfig;

use server::DaemonServer;

/// Ghost daemon - desktop companion runtime
#[derive(Parser, Debug)]
#[command(name = "ghost-daemon", version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "GHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Request socket path (overrides config)
    #[arg(long, env = "GHOST_SHIORI_SOCKET")]
    socket: Option<PathBuf>,

    /// Render socket path (overrides config)
    #[arg(long, env = "GHOST_RENDER_SOCKET")]
    render_socket: Option<PathBuf>,

    /// PID file path
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(GhostConfig::default_path);
    let mut config = GhostConfig::load(&config_path)?;
    if let Some(path) = args.socket {
        config.daemon.shiori_socket = path;
    }
    if let Some(path) = args.render_socket {
        config.daemon.render_socket = path;
    }

    if args.check_config {
        println!("config ok: {}", config_path.display());
        return Ok(());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %config.daemon.shiori_socket.display(),
        render_socket = %config.daemon.render_socket.display(),
        "Ghost daemon starting"
    );

    let pid_file = args.pid_file.clone();
    if let Some(ref path) = pid_file {
        claim_pid_file(path)?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(shutdown.clone())?;

    let mut daemon = DaemonServer::new(config);
    let result = daemon.run(shutdown).await;

    if let Some(ref path) = pid_file {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove pid file");
        }
    }

    result
}

/// Write our pid, refusing to start when another live daemon holds the file.
fn claim_pid_file(path: &Path) -> Result<()> {
    if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read pid file: {}", path.display()))?;
        if let Ok(pid) = contents.trim().parse::<i32>() {
            // Signal 0 probes for liveness without delivering anything.
            if kill(Pid::from_raw(pid), None).is_ok() {
                bail!("ghost-daemon already running with pid {pid}");
            }
        }
        warn!(path = %path.display(), "Removing stale pid file");
        fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, std::process::id().to_string())
        .with_context(|| format!("Failed to write pid file: {}", path.display()))?;
    Ok(())
}

/// Flip the shutdown flag on SIGINT or SIGTERM.
fn spawn_signal_listener(shutdown: Arc<AtomicBool>) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        shutdown.store(true, Ordering::SeqCst);
    });
    Ok(())
}
