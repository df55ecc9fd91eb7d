// SPDX-License-Identifier: MIT

//! The Raft state machine: election, log replication, and commit-index
//! advancement. Network fan-out is delegated to a [`Transport`]; applying
//! committed entries to the job state machine is the caller's job (see
//! [`crate::applier`]) — this module only tracks which prefix of the log is
//! safe to apply.

use crate::log::{LogEntry, LogError, LogStore};
use crate::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
};
use crate::transport::Transport;
use parking_lot::Mutex;
use raftq_core::NodeId;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RaftError {
    #[error("not the leader; last known leader: {0:?}")]
    NotLeader(Option<NodeId>),
    #[error(transparent)]
    Log(#[from] LogError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub node_id: NodeId,
    pub peers: Vec<NodeId>,
    /// Lower bound of the randomized election timeout (spec: ~150-300ms).
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
}

impl RaftConfig {
    pub fn new(node_id: NodeId, peers: Vec<NodeId>) -> Self {
        Self {
            node_id,
            peers,
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
        }
    }
}

struct NodeState {
    role: Role,
    current_term: u64,
    voted_for: Option<NodeId>,
    leader_id: Option<NodeId>,
    commit_index: u64,
    last_applied: u64,
    next_index: HashMap<NodeId, u64>,
    match_index: HashMap<NodeId, u64>,
    election_deadline: Instant,
}

/// A single Raft participant. Not generic over its transport or log store —
/// both are type-erased so the node can be held behind a plain `Arc` and
/// its RPC handlers spawned freely by the daemon's network layer.
pub struct RaftNode {
    config: RaftConfig,
    log: Mutex<Box<dyn LogStore>>,
    transport: Arc<dyn Transport>,
    state: Mutex<NodeState>,
}

impl RaftNode {
    pub fn new(config: RaftConfig, log: Box<dyn LogStore>, transport: Arc<dyn Transport>) -> Self {
        let now = Instant::now();
        let deadline = now + random_timeout(config.election_timeout_min, config.election_timeout_max);
        Self {
            config,
            log: Mutex::new(log),
            transport,
            state: Mutex::new(NodeState {
                role: Role::Follower,
                current_term: 0,
                voted_for: None,
                leader_id: None,
                commit_index: 0,
                last_applied: 0,
                next_index: HashMap::new(),
                match_index: HashMap::new(),
                election_deadline: deadline,
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    pub fn current_term(&self) -> u64 {
        self.state.lock().current_term
    }

    pub fn leader_hint(&self) -> Option<NodeId> {
        self.state.lock().leader_id.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    /// Appends a new command to the log if this node is the leader.
    /// Returns the `(index, term)` the entry was placed at; the caller must
    /// wait for `commit_index` to reach `index` before treating the command
    /// as durable.
    pub fn propose(&self, command_bytes: Vec<u8>) -> Result<(u64, u64), RaftError> {
        let state = self.state.lock();
        if state.role != Role::Leader {
            return Err(RaftError::NotLeader(state.leader_id.clone()));
        }
        let term = state.current_term;
        drop(state);

        let mut log = self.log.lock();
        let index = log.last_index() + 1;
        let entry = LogEntry { term, index, command_bytes };
        log.append(std::slice::from_ref(&entry))?;
        drop(log);

        let mut state = self.state.lock();
        state.match_index.insert(self.config.node_id.clone(), index);
        Ok((index, term))
    }

    pub fn handle_request_vote(&self, req: RequestVoteRequest) -> RequestVoteResponse {
        let mut state = self.state.lock();
        if req.term < state.current_term {
            return RequestVoteResponse { term: state.current_term, vote_granted: false };
        }
        if req.term > state.current_term {
            state.current_term = req.term;
            state.voted_for = None;
            state.role = Role::Follower;
        }

        let log = self.log.lock();
        let my_last_index = log.last_index();
        let my_last_term = log.term_at(my_last_index).unwrap_or_else(|| log.last_included_term());
        drop(log);

        let candidate_log_up_to_date = req.last_log_term > my_last_term
            || (req.last_log_term == my_last_term && req.last_log_index >= my_last_index);

        let can_vote = match &state.voted_for {
            None => true,
            Some(id) => *id == req.candidate_id,
        };

        if can_vote && candidate_log_up_to_date {
            state.voted_for = Some(req.candidate_id);
            state.election_deadline = Instant::now()
                + random_timeout(self.config.election_timeout_min, self.config.election_timeout_max);
            RequestVoteResponse { term: state.current_term, vote_granted: true }
        } else {
            RequestVoteResponse { term: state.current_term, vote_granted: false }
        }
    }

    pub fn handle_append_entries(
        &self,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, RaftError> {
        let mut state = self.state.lock();
        if req.term < state.current_term {
            return Ok(AppendEntriesResponse { term: state.current_term, success: false, conflict_index: None });
        }
        if req.term > state.current_term {
            state.current_term = req.term;
            state.voted_for = None;
        }
        state.role = Role::Follower;
        state.leader_id = Some(req.leader_id.clone());
        state.election_deadline = Instant::now()
            + random_timeout(self.config.election_timeout_min, self.config.election_timeout_max);

        let mut log = self.log.lock();

        if req.prev_log_index > 0 {
            match log.term_at(req.prev_log_index) {
                Some(term) if term == req.prev_log_term => {}
                Some(_) => {
                    let conflict_index = first_index_of_conflicting_term(log.as_ref(), req.prev_log_index);
                    return Ok(AppendEntriesResponse {
                        term: state.current_term,
                        success: false,
                        conflict_index: Some(conflict_index),
                    });
                }
                None => {
                    return Ok(AppendEntriesResponse {
                        term: state.current_term,
                        success: false,
                        conflict_index: Some(log.last_index() + 1),
                    });
                }
            }
        }

        for entry in &req.entries {
            match log.term_at(entry.index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    log.delete_from(entry.index)?;
                    log.append(std::slice::from_ref(entry))?;
                }
                None => {
                    log.append(std::slice::from_ref(entry))?;
                }
            }
        }

        if req.leader_commit > state.commit_index {
            state.commit_index = req.leader_commit.min(log.last_index());
        }

        Ok(AppendEntriesResponse { term: state.current_term, success: true, conflict_index: None })
    }

    /// Checks the election timeout and, if it has elapsed and this node is
    /// not the leader, runs an election. Call this on a periodic tick (the
    /// daemon drives it at a sub-election-timeout interval, e.g. 10ms).
    pub async fn tick(&self, now: Instant) {
        let should_elect = {
            let state = self.state.lock();
            state.role != Role::Leader && now >= state.election_deadline
        };
        if should_elect {
            self.run_election(now).await;
        }
    }

    async fn run_election(&self, now: Instant) {
        let (term, last_log_index, last_log_term, peers) = {
            let mut state = self.state.lock();
            state.current_term += 1;
            state.role = Role::Candidate;
            state.voted_for = Some(self.config.node_id.clone());
            state.leader_id = None;
            state.election_deadline =
                now + random_timeout(self.config.election_timeout_min, self.config.election_timeout_max);
            let log = self.log.lock();
            let last_log_index = log.last_index();
            let last_log_term = log.term_at(last_log_index).unwrap_or_else(|| log.last_included_term());
            (state.current_term, last_log_index, last_log_term, self.config.peers.clone())
        };

        if peers.is_empty() {
            self.become_leader(term);
            return;
        }

        let req = RequestVoteRequest {
            term,
            candidate_id: self.config.node_id.clone(),
            last_log_index,
            last_log_term,
        };

        let mut set = tokio::task::JoinSet::new();
        for peer in &peers {
            let transport = self.transport.clone();
            let peer = peer.clone();
            let req = req.clone();
            set.spawn(async move { transport.request_vote(&peer, req).await });
        }

        let mut votes = 1usize;
        let needed = (peers.len() + 1) / 2 + 1;
        while let Some(joined) = set.join_next().await {
            let Ok(Ok(resp)) = joined else { continue };
            if resp.term > term {
                self.step_down_to(resp.term);
                return;
            }
            if resp.vote_granted {
                votes += 1;
            }
        }

        let still_candidate = {
            let state = self.state.lock();
            state.role == Role::Candidate && state.current_term == term
        };
        if still_candidate && votes >= needed {
            self.become_leader(term);
        }
    }

    fn become_leader(&self, term: u64) {
        let mut state = self.state.lock();
        if state.role != Role::Candidate || state.current_term != term {
            return;
        }
        state.role = Role::Leader;
        state.leader_id = Some(self.config.node_id.clone());
        let next = self.log.lock().last_index() + 1;
        state.next_index = self.config.peers.iter().map(|p| (p.clone(), next)).collect();
        state.match_index = self.config.peers.iter().map(|p| (p.clone(), 0)).collect();
    }

    fn step_down_to(&self, new_term: u64) {
        let mut state = self.state.lock();
        if new_term > state.current_term {
            state.current_term = new_term;
            state.voted_for = None;
        }
        state.role = Role::Follower;
    }

    /// Leader-only: send one round of `AppendEntries` (heartbeat, or with
    /// entries if any peer is behind) and advance `commit_index` on
    /// majority replication. No-op for non-leaders.
    pub async fn replicate_once(&self) {
        let (term, peer_reqs) = {
            let state = self.state.lock();
            if state.role != Role::Leader {
                return;
            }
            let log = self.log.lock();
            let mut reqs = Vec::with_capacity(self.config.peers.len());
            for peer in &self.config.peers {
                let next = *state.next_index.get(peer).unwrap_or(&(log.last_index() + 1));
                let prev_log_index = next.saturating_sub(1);
                let prev_log_term = if prev_log_index == 0 {
                    0
                } else if prev_log_index == log.last_included_index() {
                    log.last_included_term()
                } else {
                    log.term_at(prev_log_index).unwrap_or(0)
                };
                let entries: Vec<LogEntry> = (next..=log.last_index()).filter_map(|i| log.get(i)).collect();
                reqs.push((
                    peer.clone(),
                    AppendEntriesRequest {
                        term: state.current_term,
                        leader_id: self.config.node_id.clone(),
                        prev_log_index,
                        prev_log_term,
                        entries,
                        leader_commit: state.commit_index,
                    },
                ));
            }
            (state.current_term, reqs)
        };

        let mut set = tokio::task::JoinSet::new();
        for (peer, req) in peer_reqs {
            let transport = self.transport.clone();
            set.spawn(async move {
                let resp = transport.append_entries(&peer, req.clone()).await;
                (peer, req, resp)
            });
        }

        while let Some(joined) = set.join_next().await {
            let Ok((peer, req, resp)) = joined else { continue };
            let Ok(resp) = resp else { continue };

            if resp.term > term {
                self.step_down_to(resp.term);
                continue;
            }

            let mut state = self.state.lock();
            if state.role != Role::Leader || state.current_term != term {
                continue;
            }
            if resp.success {
                let new_match = req.prev_log_index + req.entries.len() as u64;
                state.match_index.insert(peer.clone(), new_match);
                state.next_index.insert(peer.clone(), new_match + 1);
            } else {
                let retry_from = resp.conflict_index.unwrap_or(1).max(1);
                state.next_index.insert(peer.clone(), retry_from);
            }
        }

        self.advance_commit_index();
    }

    fn advance_commit_index(&self) {
        let mut state = self.state.lock();
        if state.role != Role::Leader {
            return;
        }
        let log = self.log.lock();
        let mut indices: Vec<u64> = state.match_index.values().copied().collect();
        indices.push(log.last_index());
        indices.sort_unstable_by(|a, b| b.cmp(a));
        let majority_idx = indices.len() / 2;
        let candidate = indices[majority_idx];
        if candidate > state.commit_index {
            if log.term_at(candidate) == Some(state.current_term) {
                state.commit_index = candidate;
            }
        }
    }

    pub fn commit_index(&self) -> u64 {
        self.state.lock().commit_index
    }

    pub fn last_applied(&self) -> u64 {
        self.state.lock().last_applied
    }

    /// Advances `last_applied` to `commit_index` and returns the newly
    /// committed entries in strict index order. Safe to call repeatedly;
    /// returns an empty vec once caught up.
    pub fn drain_committed(&self) -> Vec<LogEntry> {
        let mut state = self.state.lock();
        if state.commit_index <= state.last_applied {
            return Vec::new();
        }
        let log = self.log.lock();
        let from = state.last_applied + 1;
        let to = state.commit_index;
        let entries: Vec<LogEntry> = (from..=to).filter_map(|i| log.get(i)).collect();
        state.last_applied = to;
        entries
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }

    /// Seeds `commit_index`/`last_applied` from a snapshot's
    /// `raft_last_included_index` at startup. Entries at or below this index
    /// were already folded into the state machine before the snapshot was
    /// taken, so the applier must not replay them, and they are known
    /// committed regardless of what the restarted node hears from a leader.
    /// A no-op if the node has already advanced past `index` (never true on
    /// a fresh node, but harmless if called twice).
    pub fn bootstrap_from_snapshot(&self, index: u64) {
        let mut state = self.state.lock();
        state.commit_index = state.commit_index.max(index);
        state.last_applied = state.last_applied.max(index);
    }

    /// The term of the entry at `last_applied`, for recording alongside
    /// `last_applied` in a snapshot's `raft_last_included_term`.
    pub fn last_applied_term(&self) -> u64 {
        let state = self.state.lock();
        let log = self.log.lock();
        if state.last_applied == log.last_included_index() {
            log.last_included_term()
        } else {
            log.term_at(state.last_applied).unwrap_or(0)
        }
    }

    /// Compact the log store up to `up_to_index`, called by the snapshot
    /// loop once a snapshot covering that index is durably written.
    pub fn compact_log(&self, up_to_index: u64, up_to_term: u64) -> Result<(), RaftError> {
        self.log.lock().compact_up_to(up_to_index, up_to_term)?;
        Ok(())
    }
}

fn first_index_of_conflicting_term(log: &dyn LogStore, index: u64) -> u64 {
    let term = log.term_at(index).unwrap_or(0);
    let mut i = index;
    while i > log.first_index() {
        if log.term_at(i - 1) != Some(term) {
            break;
        }
        i -= 1;
    }
    i
}

fn random_timeout(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let extra = rand::thread_rng().gen_range(0..=(max - min).as_millis() as u64);
    min + Duration::from_millis(extra)
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
