// SPDX-License-Identifier: MIT

//! The Job Source: the polymorphic boundary (spec §4.7) through which a
//! worker pool acquires work and reports results, without knowing whether
//! it is talking to an in-process Controller or a remote leader over RPC.

use crate::executor::ExecutionOutcome;
use async_trait::async_trait;
use raftq_core::job::{Job, JobId};
use raftq_core::NodeId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct HeartbeatResponse {
    /// Set when the master has no record of this worker's capacity and
    /// tags; the worker should re-register before its next poll.
    pub reregister: bool,
}

#[derive(Debug, Error)]
pub enum JobSourceError {
    #[error("pool closed")]
    Closed,
    #[error("no reachable leader among {0} known peers")]
    NoReachableLeader(usize),
}

#[async_trait]
pub trait JobSource: Send + Sync {
    async fn poll(&self, max: usize) -> Result<Vec<Job>, JobSourceError>;
    async fn acknowledge(&self, job_id: JobId, outcome: ExecutionOutcome) -> Result<(), JobSourceError>;
    async fn heartbeat(&self, node_id: NodeId, current_load: usize) -> Result<HeartbeatResponse, JobSourceError>;
}

/// A poll request sent to the Controller's dispatch path: the Controller
/// pops up to `max` pending jobs under its own state lock and replies.
pub struct LocalPollRequest {
    pub max: usize,
    pub reply: oneshot::Sender<Vec<Job>>,
}

pub struct LocalAckMessage {
    pub job_id: JobId,
    pub outcome: ExecutionOutcome,
}

/// Direct, in-process binding to a Controller running in the same daemon.
/// Heartbeat is a no-op: a local worker pool's liveness is the process's
/// liveness.
pub struct LocalJobSource {
    poll_tx: mpsc::Sender<LocalPollRequest>,
    ack_tx: mpsc::Sender<LocalAckMessage>,
}

impl LocalJobSource {
    pub fn new(poll_tx: mpsc::Sender<LocalPollRequest>, ack_tx: mpsc::Sender<LocalAckMessage>) -> Self {
        Self { poll_tx, ack_tx }
    }
}

#[async_trait]
impl JobSource for LocalJobSource {
    async fn poll(&self, max: usize) -> Result<Vec<Job>, JobSourceError> {
        let (reply, rx) = oneshot::channel();
        self.poll_tx
            .send(LocalPollRequest { max, reply })
            .await
            .map_err(|_| JobSourceError::Closed)?;
        rx.await.map_err(|_| JobSourceError::Closed)
    }

    async fn acknowledge(&self, job_id: JobId, outcome: ExecutionOutcome) -> Result<(), JobSourceError> {
        self.ack_tx
            .send(LocalAckMessage { job_id, outcome })
            .await
            .map_err(|_| JobSourceError::Closed)
    }

    async fn heartbeat(&self, _node_id: NodeId, _current_load: usize) -> Result<HeartbeatResponse, JobSourceError> {
        Ok(HeartbeatResponse::default())
    }
}

/// The network-facing half of [`RemoteJobSource`]: whatever actually
/// speaks the worker/leader RPC protocol over the wire. The daemon
/// supplies a real implementation; tests use a fake.
#[async_trait]
pub trait JobSourceClient: Send + Sync {
    async fn poll(&self, leader: &NodeId, max: usize) -> Result<Vec<Job>, JobSourceError>;
    async fn acknowledge(&self, leader: &NodeId, job_id: JobId, outcome: ExecutionOutcome) -> Result<(), JobSourceError>;
    async fn heartbeat(&self, leader: &NodeId, node_id: NodeId, current_load: usize) -> Result<HeartbeatResponse, JobSourceError>;
}

/// RPC client to a leader node, with retry-with-backoff and re-discovery
/// across the known cluster peers on failure (spec §4.7).
pub struct RemoteJobSource<C: JobSourceClient> {
    client: Arc<C>,
    peers: Vec<NodeId>,
    current: parking_lot::Mutex<Option<NodeId>>,
    cursor: AtomicUsize,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl<C: JobSourceClient> RemoteJobSource<C> {
    pub fn new(client: Arc<C>, peers: Vec<NodeId>) -> Self {
        Self {
            client,
            peers,
            current: parking_lot::Mutex::new(None),
            cursor: AtomicUsize::new(0),
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }

    fn candidate_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.peers.len());
        if let Some(leader) = self.current.lock().clone() {
            order.push(leader);
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % self.peers.len().max(1);
        for i in 0..self.peers.len() {
            let peer = &self.peers[(start + i) % self.peers.len()];
            if !order.contains(peer) {
                order.push(peer.clone());
            }
        }
        order
    }

    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T, JobSourceError>
    where
        F: FnMut(NodeId) -> Fut,
        Fut: std::future::Future<Output = Result<T, JobSourceError>>,
    {
        let candidates = self.candidate_order();
        if candidates.is_empty() {
            return Err(JobSourceError::NoReachableLeader(0));
        }
        let mut backoff = self.base_backoff;
        for round in 0..3 {
            for peer in &candidates {
                match call(peer.clone()).await {
                    Ok(value) => {
                        *self.current.lock() = Some(peer.clone());
                        return Ok(value);
                    }
                    Err(_) => continue,
                }
            }
            if round < 2 {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.max_backoff);
            }
        }
        Err(JobSourceError::NoReachableLeader(candidates.len()))
    }
}

#[async_trait]
impl<C: JobSourceClient> JobSource for RemoteJobSource<C> {
    async fn poll(&self, max: usize) -> Result<Vec<Job>, JobSourceError> {
        self.with_retry(|peer| {
            let client = self.client.clone();
            async move { client.poll(&peer, max).await }
        })
        .await
    }

    async fn acknowledge(&self, job_id: JobId, outcome: ExecutionOutcome) -> Result<(), JobSourceError> {
        self.with_retry(|peer| {
            let client = self.client.clone();
            let job_id = job_id.clone();
            let outcome = outcome.clone();
            async move { client.acknowledge(&peer, job_id, outcome).await }
        })
        .await
    }

    async fn heartbeat(&self, node_id: NodeId, current_load: usize) -> Result<HeartbeatResponse, JobSourceError> {
        self.with_retry(|peer| {
            let client = self.client.clone();
            let node_id = node_id.clone();
            async move { client.heartbeat(&peer, node_id, current_load).await }
        })
        .await
    }
}

#[cfg(test)]
#[path = "job_source_tests.rs"]
mod tests;
