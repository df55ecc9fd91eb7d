// SPDX-License-Identifier: MIT

//! `raftq run` - bring up a node in one of the three modes spec.md
//! describes: a single-node `standalone` server, a `master` that
//! participates in Raft alongside its peers, or a `worker` that only
//! executes jobs pulled from a remote leader.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use raftq_daemon::config::Config;
use raftq_daemon::lifecycle::{self, LifecycleError};
use raftq_daemon::metrics::NoopMetrics;
use raftq_daemon::TcpClient;
use raftq_engine::{pool, CommandExecutor, RemoteJobSource, WorkerPoolConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(subcommand)]
    pub mode: RunMode,
}

#[derive(Subcommand, Debug)]
pub enum RunMode {
    /// Single node, no Raft peers: durability via WAL only
    Standalone {
        #[arg(long, value_name = "PATH")]
        config: PathBuf,
    },
    /// A member of a replicated cluster
    Master {
        #[arg(long, value_name = "PATH")]
        config: PathBuf,
    },
    /// Executes jobs pulled from a remote leader; runs no local Controller or Raft
    Worker {
        #[arg(long, value_name = "PATH")]
        config: PathBuf,
    },
}

pub async fn run(args: RunArgs) -> Result<()> {
    match args.mode {
        RunMode::Standalone { config } => run_standalone(config).await,
        RunMode::Master { config } => run_master(config).await,
        RunMode::Worker { config } => run_worker(config).await,
    }
}

async fn run_standalone(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path).context("loading config")?;
    if !config.peers.is_empty() {
        bail!("standalone mode expects an empty `peers` list; found {} peer(s) (use `raftq run master` instead)", config.peers.len());
    }
    run_daemon(config).await
}

async fn run_master(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path).context("loading config")?;
    if config.peers.is_empty() {
        bail!("master mode expects at least one peer in `peers` (use `raftq run standalone` for a single node)");
    }
    run_daemon(config).await
}

async fn run_daemon(config: Config) -> Result<()> {
    let node = match lifecycle::startup(config, Arc::new(NoopMetrics)).await {
        Ok(node) => node,
        Err(LifecycleError::LockFailed(path)) => {
            bail!("a raftqd instance is already running (lock held at {})", path.display());
        }
        Err(e) => return Err(e.into()),
    };
    info!(addr = %node.local_addr(), "rpc listener bound");

    wait_for_termination().await?;
    lifecycle::shutdown(node).await;
    Ok(())
}

async fn run_worker(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path).context("loading config")?;
    if config.peers.is_empty() {
        bail!("worker mode needs at least one peer address to poll for work");
    }

    let client = Arc::new(TcpClient::new(config.peer_addresses()));
    let leaders = config.peers.iter().map(|p| p.node_id.clone()).collect();
    let source = Arc::new(RemoteJobSource::new(client, leaders));
    let executor = Arc::new(CommandExecutor);
    let pool_config = WorkerPoolConfig {
        worker_count: config.worker_count,
        task_timeout: config.task_timeout,
        poll_interval: std::time::Duration::from_millis(200),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let pool_task = tokio::spawn(pool::run(executor, source, pool_config, shutdown_rx));

    wait_for_termination().await?;
    let _ = shutdown_tx.send(true);
    pool_task.await.context("worker pool task panicked")?;
    Ok(())
}

async fn wait_for_termination() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received sigterm, shutting down"),
        _ = sigint.recv() => info!("received sigint, shutting down"),
    }
    Ok(())
}
