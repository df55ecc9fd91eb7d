// SPDX-License-Identifier: MIT

//! The Controller: the four loops of spec §4.5 (dispatch, result, timeout,
//! snapshot) wired to one of two consensus modes.
//!
//! In `SingleNode` mode there is no Raft involved at all — the WAL is the
//! sole durability and ordering mechanism for ENQUEUE/ACK/RETRY/DEAD, and a
//! command is applied to the job state machine the instant its WAL record
//! is durable. In `Replicated` mode those same commands are proposed to
//! the Raft log instead; the WAL only ever records DISPATCH/TIMEOUT, which
//! are local, non-consensus-worthy bookkeeping in both modes (spec §4.5:
//! dispatch is always a local decision, never proposed).

use crate::metrics::Metrics;
use crate::registry::WorkerRegistry;
use raftq_core::command::{AckStatus, Command};
use raftq_core::job::{Job, JobId, JobStateMachine};
use raftq_core::worker::WorkerId;
use raftq_core::{Clock, NodeId};
use raftq_engine::ExecutionOutcome;
use raftq_raft::log::LogEntry;
use raftq_raft::node::{RaftError, RaftNode};
use raftq_storage::{Wal, WalEntry, WalError, WalEventType};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    #[error("raft error: {0}")]
    Raft(#[from] RaftError),
    #[error("proposal was not applied before the commit wait timed out")]
    CommitTimeout,
    #[error("job serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("job {0} already exists")]
    DuplicateJob(String),
    #[error("node halted after a durability failure; restart required")]
    Halted,
}

/// How this Controller durably orders and applies commands.
pub enum Consensus {
    SingleNode,
    Replicated(Arc<RaftNode>),
}

impl Consensus {
    pub fn is_replicated(&self) -> bool {
        matches!(self, Consensus::Replicated(_))
    }

    /// The cluster's current leader, for redirect hints. Always this node
    /// in single-node mode.
    pub fn leader_hint(&self, self_id: &raftq_core::NodeId) -> Option<raftq_core::NodeId> {
        match self {
            Consensus::SingleNode => Some(self_id.clone()),
            Consensus::Replicated(raft) => raft.leader_hint(),
        }
    }

    pub fn is_leader(&self) -> bool {
        match self {
            Consensus::SingleNode => true,
            Consensus::Replicated(raft) => raft.is_leader(),
        }
    }
}

/// Poll interval for [`Controller::propose_command`]'s commit-wait loop in
/// `Replicated` mode. Short enough not to add meaningful latency to a
/// normal sub-heartbeat-interval commit.
const COMMIT_POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Ceiling on how long a proposal waits to see itself applied before
/// giving up and reporting failure to the caller (who may retry against
/// a new leader).
const COMMIT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Controller {
    state: parking_lot::Mutex<JobStateMachine>,
    wal: parking_lot::Mutex<Wal>,
    scheduler: parking_lot::Mutex<raftq_engine::Scheduler>,
    consensus: Consensus,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
    max_retry: u32,
    /// Set once a WAL durability operation fails (spec §7: durability
    /// failure is fatal for the affected node). Once set, this node stops
    /// proposing or accepting new writes; a restart is required to clear it.
    halted: std::sync::atomic::AtomicBool,
    registry: WorkerRegistry,
}

impl Controller {
    pub fn new(
        state: JobStateMachine,
        wal: Wal,
        consensus: Consensus,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn Metrics>,
        max_retry: u32,
    ) -> Self {
        Self {
            state: parking_lot::Mutex::new(state),
            wal: parking_lot::Mutex::new(wal),
            scheduler: parking_lot::Mutex::new(raftq_engine::Scheduler::new()),
            consensus,
            clock,
            metrics,
            max_retry,
            halted: std::sync::atomic::AtomicBool::new(false),
            registry: WorkerRegistry::new(),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.consensus.is_leader()
    }

    /// Whether a durability failure has halted this node (spec §7). A
    /// halted node must be restarted; it will not propose or accept
    /// further writes.
    pub fn is_halted(&self) -> bool {
        self.halted.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Record a fatal WAL durability failure and stop accepting writes.
    fn halt(&self, context: &str, error: &WalError) {
        tracing::error!(error = %error, "durability failure ({context}); halting this node, restart required");
        self.halted.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn leader_hint(&self, self_id: &raftq_core::NodeId) -> Option<raftq_core::NodeId> {
        self.consensus.leader_hint(self_id)
    }

    /// The underlying `RaftNode`, for callers (the lifecycle's listener and
    /// background loops) that need to drive it directly. `None` in
    /// single-node mode.
    pub fn consensus_raft(&self) -> Option<&Arc<RaftNode>> {
        match &self.consensus {
            Consensus::SingleNode => None,
            Consensus::Replicated(raft) => Some(raft),
        }
    }

    // ---- worker registry (spec §6 RegisterWorker, §4.6 heartbeat) ----

    /// Record a worker's address, capacity, and tags. Not durable — a
    /// worker re-registers on its next heartbeat if this node loses the
    /// table across a restart or failover.
    pub fn register_worker(&self, node_id: NodeId, address: String, capacity: usize, tags: Vec<String>) {
        let now = self.clock.now();
        self.registry.register(node_id, address, capacity, tags, now);
    }

    /// Record a heartbeat's load. Returns whether the worker should
    /// re-register: it heartbeated without this node having a record of
    /// its capacity and tags.
    pub fn record_heartbeat(&self, node_id: &NodeId, current_load: usize) -> bool {
        let now = self.clock.now();
        self.registry.heartbeat(node_id, current_load, now)
    }

    // ---- dispatch loop (spec §4.5 step 1): always local, never proposed ----

    /// Pop up to `max` pending jobs, move them in-flight under `worker_id`,
    /// and record a local DISPATCH audit event for each. Never touches
    /// consensus in either mode.
    pub fn handle_poll(&self, worker_id: WorkerId, max: usize) -> Vec<Job> {
        if self.is_halted() {
            return Vec::new();
        }
        let now = self.clock.now();
        let mut state = self.state.lock();
        let mut wal = self.wal.lock();
        let mut scheduler = self.scheduler.lock();
        let mut dispatched = Vec::with_capacity(max);

        while dispatched.len() < max {
            let Some(job) = state.dispatch_next(worker_id.clone(), now) else { break };
            if let Err(e) = wal.append(WalEventType::Dispatch, job.id.clone(), now, None) {
                tracing::warn!(job_id = %job.id, error = %e, "failed to record dispatch audit event");
            }
            scheduler.set_deadline(job.id.clone(), std::time::Instant::now() + job.timeout);
            self.metrics.incr_counter("jobs_dispatched", 1);
            dispatched.push(job);
        }
        if let Err(e) = wal.flush() {
            self.halt("dispatch audit flush", &e);
        }
        dispatched
    }

    // ---- result loop (spec §4.5 step 2) ----

    /// Apply a worker's reported outcome: COMPLETED on success, otherwise
    /// RETRY or DEAD depending on whether `max_retry` attempts have already
    /// been spent.
    pub async fn handle_ack(&self, job_id: JobId, outcome: ExecutionOutcome) -> Result<(), ControllerError> {
        self.scheduler.lock().clear(&job_id);
        let command = match outcome {
            ExecutionOutcome::Success(result) => {
                Command::Ack { job_id, status: AckStatus::Completed, result: Some(result) }
            }
            ExecutionOutcome::Failure(_) | ExecutionOutcome::TimedOut => self.retry_or_dead_command(job_id),
        };
        self.propose_command(command).await
    }

    fn retry_or_dead_command(&self, job_id: JobId) -> Command {
        let attempt = self.state.lock().attempt_of(&job_id).unwrap_or(0);
        if attempt >= self.max_retry {
            Command::Ack { job_id, status: AckStatus::Dead, result: None }
        } else {
            Command::Retry { job_id }
        }
    }

    // ---- timeout loop (spec §4.5 step 3) ----

    /// Sweep in-flight jobs whose deadline has passed. Returns the number
    /// processed. The authoritative expiry check is
    /// [`JobStateMachine::get_expired`] (wall-clock `DateTime`); the
    /// in-process [`raftq_engine::Scheduler`] only sizes the sleep between
    /// sweeps so the loop doesn't spin.
    pub async fn run_timeout_sweep(&self) -> usize {
        if self.is_halted() {
            return 0;
        }
        let now = self.clock.now();
        let expired = self.state.lock().get_expired(now);
        for job_id in &expired {
            if let Err(e) = self.wal.lock().append(WalEventType::Timeout, job_id.clone(), now, None) {
                tracing::warn!(job_id = %job_id, error = %e, "failed to record timeout audit event");
            }
            let command = self.retry_or_dead_command(job_id.clone());
            if let Err(e) = self.propose_command(command).await {
                tracing::warn!(job_id = %job_id, error = %e, "failed to propose outcome for timed-out job");
            }
        }
        if let Err(e) = self.wal.lock().flush() {
            self.halt("timeout audit flush", &e);
        }
        self.metrics.incr_counter("jobs_timed_out", expired.len() as u64);
        expired.len()
    }

    /// How long the timeout loop should sleep before its next sweep.
    pub fn next_sweep_delay(&self, fallback: Duration) -> Duration {
        match self.scheduler.lock().next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(std::time::Instant::now()),
            None => fallback,
        }
    }

    // ---- client surface ----

    /// Fails with [`ControllerError::DuplicateJob`] if `job_id` is already
    /// known locally. This is a best-effort check against this node's own
    /// applied state, not a consensus-wide guarantee: two concurrent
    /// submissions of the same id racing through proposal can both pass it
    /// before either commits. `apply_command`'s own idempotent no-op is
    /// still what keeps the state machine itself correct either way; this
    /// check exists to surface the common case (an accidental duplicate
    /// submitted against a job that already completed proposal) as an
    /// explicit error instead of a silent, misleading success.
    pub async fn submit_job(&self, job_id: JobId, payload: serde_json::Value, timeout: Duration) -> Result<(), ControllerError> {
        if self.state.lock().get(&job_id).is_some() {
            return Err(ControllerError::DuplicateJob(job_id.to_string()));
        }
        let now = self.clock.now();
        let job = Job::new(job_id, payload, timeout, now);
        self.propose_command(Command::Enqueue { jobs: vec![job] }).await
    }

    // ---- invariant audit (spec §11 supplemented feature) ----

    /// Checks set-partition and field invariants, feeding violations to the
    /// metrics gauge. Grounded in the teacher's periodic reconciliation
    /// pattern: a cheap, low-frequency check that a bug elsewhere would
    /// otherwise leave undetected until it manifests as a user-visible
    /// symptom.
    pub fn run_invariant_audit(&self) {
        match self.state.lock().validate() {
            Ok(()) => self.metrics.set_gauge("invariant_violations", 0.0),
            Err(e) => {
                tracing::error!(error = %e, "job state machine invariant violated");
                self.metrics.set_gauge("invariant_violations", 1.0);
            }
        }
    }

    // ---- proposal plumbing ----

    /// Durably order and apply `command` per the active consensus mode.
    async fn propose_command(&self, command: Command) -> Result<(), ControllerError> {
        if self.is_halted() {
            return Err(ControllerError::Halted);
        }
        match &self.consensus {
            Consensus::SingleNode => {
                self.write_wal_for_command(&command)?;
                self.apply_command(command);
                Ok(())
            }
            Consensus::Replicated(raft) => {
                let bytes = serde_json::to_vec(&command)?;
                let (index, _term) = raft.propose(bytes)?;
                self.wait_for_commit(raft, index).await
            }
        }
    }

    async fn wait_for_commit(&self, raft: &Arc<RaftNode>, index: u64) -> Result<(), ControllerError> {
        let start = std::time::Instant::now();
        loop {
            if raft.last_applied() >= index {
                return Ok(());
            }
            if start.elapsed() > COMMIT_WAIT_TIMEOUT {
                return Err(ControllerError::CommitTimeout);
            }
            tokio::time::sleep(COMMIT_POLL_INTERVAL).await;
        }
    }

    /// Callback handed to `raftq_raft::applier::run`: decodes and applies
    /// one committed log entry. Idempotent, per the applier's contract.
    pub fn apply_committed_entry(&self, entry: LogEntry) {
        match serde_json::from_slice::<Command>(&entry.command_bytes) {
            Ok(command) => self.apply_command(command),
            Err(e) => tracing::error!(index = entry.index, error = %e, "failed to decode committed command"),
        }
    }

    fn write_wal_for_command(&self, command: &Command) -> Result<(), WalError> {
        let now = self.clock.now();
        let mut wal = self.wal.lock();
        match command {
            Command::Enqueue { jobs } => {
                for job in jobs {
                    wal.append(WalEventType::Enqueue, job.id.clone(), now, Some(job.clone()))?;
                }
            }
            Command::Ack { job_id, status: AckStatus::Completed, .. } => {
                wal.append(WalEventType::Ack, job_id.clone(), now, None)?;
            }
            Command::Ack { job_id, status: AckStatus::Dead, .. } => {
                wal.append(WalEventType::Dead, job_id.clone(), now, None)?;
            }
            Command::Retry { job_id } => {
                wal.append(WalEventType::Retry, job_id.clone(), now, None)?;
            }
        }
        wal.flush()
    }

    fn apply_command(&self, command: Command) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        match command {
            Command::Enqueue { jobs } => {
                for job in jobs {
                    let job_id = job.id.clone();
                    if let Err(e) = state.enqueue(job) {
                        tracing::debug!(job_id = %job_id, error = %e, "enqueue replay no-op");
                    } else {
                        self.metrics.incr_counter("jobs_enqueued", 1);
                    }
                }
            }
            Command::Ack { job_id, status: AckStatus::Completed, .. } => {
                if let Err(e) = state.mark_completed(&job_id, now) {
                    tracing::debug!(job_id = %job_id, error = %e, "mark_completed replay no-op");
                } else {
                    self.metrics.incr_counter("jobs_completed", 1);
                }
                self.scheduler.lock().clear(&job_id);
            }
            Command::Ack { job_id, status: AckStatus::Dead, .. } => {
                if let Err(e) = state.mark_dead(&job_id, now) {
                    tracing::debug!(job_id = %job_id, error = %e, "mark_dead replay no-op");
                } else {
                    self.metrics.incr_counter("jobs_dead", 1);
                }
                self.scheduler.lock().clear(&job_id);
            }
            Command::Retry { job_id } => {
                if let Err(e) = state.requeue(&job_id, now) {
                    tracing::debug!(job_id = %job_id, error = %e, "requeue replay no-op");
                } else {
                    self.metrics.incr_counter("jobs_retried", 1);
                }
                self.scheduler.lock().clear(&job_id);
            }
        }
    }

    // ---- startup recovery (driven by `lifecycle`) ----

    /// Replay one WAL record into the state machine. DISPATCH and TIMEOUT
    /// are skipped: they are local audit events whose transient effects
    /// are superseded by the RETRY/ACK/DEAD events they lead to, and any
    /// job still IN_FLIGHT after a full replay is unconditionally requeued
    /// by the caller's recovery step regardless of whether DISPATCH was
    /// replayed.
    pub fn replay_wal_entry(&self, entry: WalEntry) {
        let mut state = self.state.lock();
        match entry.event_type {
            WalEventType::Enqueue => {
                if let Some(job) = entry.payload {
                    let _ = state.enqueue(job);
                }
            }
            WalEventType::Ack => {
                let _ = state.mark_completed(&entry.job_id, entry.timestamp);
            }
            WalEventType::Dead => {
                let _ = state.mark_dead(&entry.job_id, entry.timestamp);
            }
            WalEventType::Retry => {
                let _ = state.requeue(&entry.job_id, entry.timestamp);
            }
            WalEventType::Dispatch | WalEventType::Timeout => {}
        }
    }

    /// Step 3 of recovery (spec §4.5): any job left IN_FLIGHT after restore
    /// and replay was mid-attempt when the process stopped and gets no
    /// credit for that attempt.
    pub fn requeue_all_in_flight_without_penalty(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let stuck: Vec<JobId> = {
            let snapshot = state.snapshot_view();
            snapshot.in_flight.keys().cloned().collect()
        };
        for job_id in stuck {
            let _ = state.requeue_without_incrementing_attempt(&job_id, now);
        }
    }

    pub fn snapshot_view(&self) -> raftq_core::job::SnapshotData {
        self.state.lock().snapshot_view()
    }

    pub fn restore(&self, snapshot: raftq_core::job::SnapshotData) {
        self.state.lock().restore(snapshot);
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending_count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight_count()
    }

    pub fn completed_count(&self) -> usize {
        self.state.lock().completed_count()
    }

    pub fn dead_count(&self) -> usize {
        self.state.lock().dead_count()
    }

    /// Full record of a job in any set, cloned out from under the lock.
    pub fn job_snapshot(&self, job_id: &JobId) -> Option<Job> {
        self.state.lock().get(job_id).cloned()
    }

    // ---- snapshot loop plumbing (driven by `lifecycle`) ----

    /// Highest WAL `seq` written so far, recorded in the next snapshot so a
    /// future restart knows where to resume replay.
    pub fn wal_processed_seq(&self) -> u64 {
        self.wal.lock().write_seq()
    }

    /// Seal the WAL's active segment and start a new one (spec §4.5 step 3:
    /// "rotate WAL" ahead of truncating it below the snapshot index).
    pub fn rotate_wal(&self) -> Result<(), WalError> {
        self.wal.lock().rotate()
    }

    /// Drop WAL records already folded into a durably written snapshot.
    /// Whole sealed segments entirely below `seq` are deleted outright;
    /// a segment straddling the cutoff is compacted in place.
    pub fn truncate_wal_before(&self, seq: u64) -> Result<(), WalError> {
        self.wal.lock().truncate_before(seq)
    }

    /// Flush and release the WAL at shutdown.
    pub fn close_wal(&self) -> Result<(), WalError> {
        self.wal.lock().close()
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
