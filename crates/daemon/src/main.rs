// SPDX-License-Identifier: MIT

//! raftqd — the job-queue daemon.
//!
//! Each node runs one `raftqd` process: an RPC listener servicing both
//! intra-cluster Raft traffic and worker/client requests, a controller
//! applying commands to the job state machine, and (unless disabled) a
//! local worker pool executing dispatched jobs.

use std::path::PathBuf;
use std::sync::Arc;

use raftq_daemon::config::Config;
use raftq_daemon::lifecycle::{self, LifecycleError};
use raftq_daemon::metrics::NoopMetrics;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    match std::env::args().nth(1).as_deref() {
        Some("--version" | "-V") => {
            println!("raftqd {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some("--help" | "-h") => {
            print_help();
            return Ok(());
        }
        Some(other) => {
            eprintln!("error: unexpected argument '{other}'");
            eprintln!("usage: raftqd [--config PATH | --help | --version]");
            std::process::exit(1);
        }
        None => {}
    }

    let config_path = std::env::var("RAFTQ_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("raftq.toml"));
    let config = Config::load(&config_path)?;

    let _log_guard = setup_logging(&config);
    info!(node_id = %config.node_id, "starting raftqd");

    let node = match lifecycle::startup(config, Arc::new(NoopMetrics)).await {
        Ok(node) => node,
        Err(LifecycleError::LockFailed(path)) => {
            eprintln!("raftqd is already running (lock held at {})", path.display());
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "failed to start raftqd");
            return Err(e.into());
        }
    };

    info!(addr = %node.local_addr(), "rpc listener bound");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received sigterm, shutting down"),
        _ = sigint.recv() => info!("received sigint, shutting down"),
    }

    lifecycle::shutdown(node).await;
    info!("raftqd stopped");
    Ok(())
}

fn print_help() {
    println!("raftqd {}", env!("CARGO_PKG_VERSION"));
    println!("Fault-tolerant distributed job queue daemon");
    println!();
    println!("USAGE:");
    println!("    raftqd [--config PATH]");
    println!();
    println!("Configuration is read from the path in RAFTQ_CONFIG, or ./raftq.toml");
    println!("if unset. Individual settings can be overridden with RAFTQ_* environment");
    println!("variables — see raftq_daemon::config for the full list.");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Print help information");
    println!("    -V, --version    Print version information");
}

/// Stderr-and-file logging: a non-blocking file appender under the node's
/// state directory plus an `EnvFilter` (`RUST_LOG`, default `info`). The
/// returned guard must be held for the process lifetime or buffered lines
/// are lost on exit.
fn setup_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if std::fs::create_dir_all(&config.state_dir).is_err() {
        return None;
    }
    let file_appender = tracing_appender::rolling::never(&config.state_dir, "raftqd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Some(guard)
}
