// SPDX-License-Identifier: MIT

//! Startup, recovery, and shutdown: the sequence that turns a [`Config`]
//! into a running node and tears it back down cleanly. Grounded in the
//! teacher's `startup`/`shutdown` pair — acquire the PID lock first so two
//! daemons never share a state directory, recover state, bind last, and on
//! shutdown flush durability state before releasing anything.

use crate::client::TcpClient;
use crate::config::Config;
use crate::controller::{Consensus, Controller};
use crate::metrics::Metrics;
use crate::server::{ListenCtx, Listener};
use fs2::FileExt;
use raftq_core::job::JobStateMachine;
use raftq_core::{Clock, SystemClock};
use raftq_engine::job_source::{LocalAckMessage, LocalJobSource, LocalPollRequest};
use raftq_engine::{CommandExecutor, WorkerPoolConfig};
use raftq_raft::{FileLogStore, RaftConfig, RaftNode};
use raftq_storage::{Checkpointer, Snapshot, SnapshotStore, Wal};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to acquire lock at {0}: another daemon instance is already running there")]
    LockFailed(PathBuf),
    #[error("failed to bind rpc listener at {0}: {1}")]
    BindFailed(String, std::io::Error),
    #[error("wal error: {0}")]
    Wal(#[from] raftq_storage::WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] raftq_storage::SnapshotError),
    #[error("raft log error: {0}")]
    RaftLog(#[from] raftq_raft::LogError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything spawned at startup that the caller must hold onto for the
/// lifetime of the node and hand back to [`shutdown`] at the end.
pub struct RunningNode {
    pub config: Config,
    pub controller: Arc<Controller>,
    pub raft: Option<Arc<RaftNode>>,
    lock_file: File,
    listener_shutdown: Arc<Notify>,
    background_shutdown: watch::Sender<bool>,
    tasks: tokio::task::JoinSet<()>,
    local_addr: std::net::SocketAddr,
}

impl RunningNode {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }
}

impl std::fmt::Debug for RunningNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningNode").field("local_addr", &self.local_addr).finish_non_exhaustive()
    }
}

fn lock_path(config: &Config) -> PathBuf {
    config.state_dir.join("daemon.pid")
}

/// Bring a node fully up: acquire the lock, recover state from snapshot +
/// WAL, build consensus, bind the listener, and spawn every background
/// loop. On any failure the partially-acquired lock is released so a
/// retry (or a different node) isn't left wedged out.
pub async fn startup(config: Config, metrics: Arc<dyn Metrics>) -> Result<RunningNode, LifecycleError> {
    match startup_inner(&config, metrics).await {
        Ok(node) => Ok(node),
        Err(e) => Err(e),
    }
}

async fn startup_inner(config: &Config, metrics: Arc<dyn Metrics>) -> Result<RunningNode, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    let lock_file = acquire_lock(config)?;

    let snapshot_store = SnapshotStore::new(&config.snapshot_path);
    let snapshot = snapshot_store.load()?;

    let mut state = JobStateMachine::new();
    let processed_seq = match &snapshot {
        Some(s) => {
            state.restore(s.data.clone());
            info!(seq = s.last_applied_seq, pending = s.data.pending.len(), in_flight = s.data.in_flight.len(), "loaded snapshot");
            s.last_applied_seq
        }
        None => {
            info!("no snapshot found, starting from an empty state");
            0
        }
    };

    let mut replay_wal = Wal::open(&config.wal_path, processed_seq)?;
    let controller_wal = Wal::open(&config.wal_path, processed_seq)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let consensus = build_consensus(config, &snapshot)?;
    let controller = Arc::new(Controller::new(state, controller_wal, consensus, clock, metrics.clone(), config.max_retry));

    let mut replayed = 0usize;
    while let Some(entry) = replay_wal.next_unprocessed()? {
        controller.replay_wal_entry(entry);
        replayed += 1;
    }
    if replayed > 0 {
        info!(count = replayed, "replayed wal entries since last snapshot");
    }
    controller.requeue_all_in_flight_without_penalty();

    let raft = controller.consensus_raft().cloned();

    let listener_shutdown = Arc::new(Notify::new());
    let ctx = Arc::new(ListenCtx {
        node_id: config.node_id.clone(),
        controller: controller.clone(),
        raft: raft.clone(),
        shutdown: listener_shutdown.clone(),
    });
    let listener = Listener::bind(&config.rpc_bind, ctx)
        .await
        .map_err(|e| LifecycleError::BindFailed(config.rpc_bind.clone(), e))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, node_id = %config.node_id, "rpc listener bound");

    let (background_shutdown, shutdown_rx) = watch::channel(false);
    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(listener.run());

    if let Some(raft) = &raft {
        tasks.spawn(raft_driver(raft.clone(), shutdown_rx.clone()));
        tasks.spawn(applier_loop(raft.clone(), controller.clone(), shutdown_rx.clone()));
    }

    tasks.spawn(timeout_sweep_loop(controller.clone(), shutdown_rx.clone()));
    tasks.spawn(invariant_audit_loop(controller.clone(), shutdown_rx.clone()));
    tasks.spawn(snapshot_loop(
        controller.clone(),
        raft.clone(),
        SnapshotStore::new(&config.snapshot_path),
        config.snapshot_interval,
        shutdown_rx.clone(),
    ));

    if config.worker_count > 0 && !config.disable_dispatch_loop {
        tasks.spawn(local_worker_pool(controller.clone(), config.clone(), shutdown_rx.clone()));
    }

    Ok(RunningNode {
        config: config.clone(),
        controller,
        raft,
        lock_file,
        listener_shutdown,
        background_shutdown,
        tasks,
        local_addr,
    })
}

fn acquire_lock(config: &Config) -> Result<File, LifecycleError> {
    let path = lock_path(config);
    let lock_file = std::fs::OpenOptions::new().write(true).create(true).truncate(false).open(&path)?;
    lock_file.try_lock_exclusive().map_err(|_| LifecycleError::LockFailed(path.clone()))?;
    lock_file.set_len(0)?;
    let mut lock_file = lock_file;
    writeln!(lock_file, "{}", std::process::id())?;
    Ok(lock_file)
}

fn build_consensus(config: &Config, snapshot: &Option<Snapshot>) -> Result<Consensus, LifecycleError> {
    let peer_ids = config.peer_ids();
    if peer_ids.is_empty() {
        return Ok(Consensus::SingleNode);
    }

    let log = FileLogStore::open(&config.raft_log_path)?;
    let transport = Arc::new(TcpClient::new(config.peer_addresses()));
    let mut raft_config = RaftConfig::new(config.node_id.clone(), peer_ids);
    raft_config.heartbeat_interval = config.heartbeat_interval;
    raft_config.election_timeout_min = config.election_timeout_base;
    raft_config.election_timeout_max = config.election_timeout_base * 2;

    let raft = RaftNode::new(raft_config, Box::new(log), transport);
    if let Some(snapshot) = snapshot {
        raft.bootstrap_from_snapshot(snapshot.raft_last_included_index);
    }
    Ok(Consensus::Replicated(Arc::new(raft)))
}

async fn raft_driver(raft: Arc<RaftNode>, mut shutdown: watch::Receiver<bool>) {
    let tick_interval = (raft.heartbeat_interval() / 5).max(Duration::from_millis(5));
    let mut ticker = tokio::time::interval(tick_interval);
    let mut heartbeat = tokio::time::interval(raft.heartbeat_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => raft.tick(std::time::Instant::now()).await,
            _ = heartbeat.tick() => raft.replicate_once().await,
            _ = shutdown.changed() => if *shutdown.borrow() { return },
        }
    }
}

async fn applier_loop(raft: Arc<RaftNode>, controller: Arc<Controller>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_millis(10));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                for entry in raft.drain_committed() {
                    controller.apply_committed_entry(entry);
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    for entry in raft.drain_committed() {
                        controller.apply_committed_entry(entry);
                    }
                    return;
                }
            }
        }
    }
}

async fn timeout_sweep_loop(controller: Arc<Controller>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let delay = controller.next_sweep_delay(Duration::from_millis(200));
        tokio::select! {
            _ = tokio::time::sleep(delay) => { controller.run_timeout_sweep().await; }
            _ = shutdown.changed() => if *shutdown.borrow() { return },
        }
    }
}

async fn invariant_audit_loop(controller: Arc<Controller>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = interval.tick() => controller.run_invariant_audit(),
            _ = shutdown.changed() => if *shutdown.borrow() { return },
        }
    }
}

/// Periodically checkpoints hot state and compacts both the WAL and (in
/// replicated mode) the Raft log store up to the same covered sequence.
async fn snapshot_loop(
    controller: Arc<Controller>,
    raft: Option<Arc<RaftNode>>,
    store: SnapshotStore,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut checkpointer = Checkpointer::new(store);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => take_snapshot(&controller, &raft, &mut checkpointer).await,
            _ = shutdown.changed() => if *shutdown.borrow() { return },
        }
    }
}

async fn take_snapshot(controller: &Arc<Controller>, raft: &Option<Arc<RaftNode>>, checkpointer: &mut Checkpointer) {
    let data = controller.snapshot_view();
    let (raft_index, raft_term) = match raft {
        Some(raft) => (raft.last_applied(), raft.last_applied_term()),
        None => (0, 0),
    };
    let last_applied_seq = controller.wal_processed_seq();
    let snapshot = Snapshot::new(last_applied_seq, raft_index, raft_term, data, chrono::Utc::now());

    match checkpointer.start(snapshot) {
        Ok(handle) => match handle.wait() {
            Ok(result) => {
                if let Err(e) = controller.rotate_wal() {
                    warn!(error = %e, "failed to rotate wal after snapshot");
                }
                if let Err(e) = controller.truncate_wal_before(result.last_applied_seq) {
                    warn!(error = %e, "failed to truncate wal after snapshot");
                }
                if let Some(raft) = raft {
                    if let Err(e) = raft.compact_log(raft_index, raft_term) {
                        warn!(error = %e, "failed to compact raft log after snapshot");
                    }
                }
            }
            Err(e) => warn!(error = %e, "snapshot checkpoint failed"),
        },
        Err(e) => warn!(error = %e, "could not start snapshot checkpoint"),
    }
}

/// Bridges the Worker Pool's local `JobSource` channels directly into the
/// Controller, bypassing the network for work this node executes itself.
async fn local_worker_pool(controller: Arc<Controller>, config: Config, mut shutdown: watch::Receiver<bool>) {
    let (poll_tx, mut poll_rx) = mpsc::channel::<LocalPollRequest>(32);
    let (ack_tx, mut ack_rx) = mpsc::channel::<LocalAckMessage>(32);
    let source = Arc::new(LocalJobSource::new(poll_tx, ack_tx));
    let executor = Arc::new(CommandExecutor);
    let worker_id = raftq_core::worker::WorkerId::new(config.node_id.as_str());

    let bridge_controller = controller.clone();
    let mut bridge_shutdown = shutdown.clone();
    let bridge = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(req) = poll_rx.recv() => {
                    let jobs = bridge_controller.handle_poll(worker_id.clone(), req.max);
                    let _ = req.reply.send(jobs);
                }
                Some(msg) = ack_rx.recv() => {
                    if let Err(e) = bridge_controller.handle_ack(msg.job_id, msg.outcome).await {
                        warn!(error = %e, "local worker pool ack failed");
                    }
                }
                _ = bridge_shutdown.changed() => if *bridge_shutdown.borrow() { return },
            }
        }
    });

    let pool_config = WorkerPoolConfig {
        worker_count: config.worker_count,
        task_timeout: config.task_timeout,
        poll_interval: Duration::from_millis(100),
    };
    raftq_engine::pool::run(executor, source, pool_config, shutdown).await;
    bridge.abort();
}

/// Stop accepting new connections, let background loops finish their
/// current iteration, flush the WAL, and write a final snapshot so the
/// next startup has as little to replay as possible.
pub async fn shutdown(mut node: RunningNode) {
    info!("shutting down");
    node.listener_shutdown.notify_waiters();
    let _ = node.background_shutdown.send(true);

    while node.tasks.join_next().await.is_some() {}

    let store = SnapshotStore::new(&node.config.snapshot_path);
    let mut checkpointer = Checkpointer::new(store);
    take_snapshot(&node.controller, &node.raft, &mut checkpointer).await;

    if let Err(e) = node.controller.close_wal() {
        warn!(error = %e, "failed to close wal on shutdown");
    }

    let lock_path = lock_path(&node.config);
    let _ = std::fs::remove_file(&lock_path);
    drop(node.lock_file);
    info!("shutdown complete");
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
