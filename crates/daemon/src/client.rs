// SPDX-License-Identifier: MIT

//! Outbound TCP clients: a [`Transport`] implementation for Raft's peer
//! RPCs and a [`JobSourceClient`] implementation for a worker's
//! leader-discovery RPCs. Both open a fresh connection per call — simple
//! and correct for this crate's scale; pooling would be the first thing to
//! add if connection setup overhead ever shows up in profiling.

use crate::protocol::{read_message, write_message, ProtocolError, Request, Response};
use async_trait::async_trait;
use raftq_core::job::{Job, JobId};
use raftq_core::NodeId;
use raftq_engine::{ExecutionOutcome, HeartbeatResponse, JobSourceClient, JobSourceError};
use raftq_raft::{AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse};
use raftq_raft::transport::{Transport, TransportError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;

/// Resolves a peer's `NodeId` to a dialable `host:port` address.
pub struct TcpClient {
    addresses: HashMap<NodeId, String>,
    connect_timeout: Duration,
}

impl TcpClient {
    pub fn new(addresses: HashMap<NodeId, String>) -> Self {
        Self { addresses, connect_timeout: Duration::from_secs(2) }
    }

    async fn connect(&self, peer: &NodeId) -> Result<TcpStream, String> {
        let addr = self.addresses.get(peer).ok_or_else(|| format!("unknown peer {peer}"))?;
        tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| format!("connect to {peer} timed out"))?
            .map_err(|e| format!("connect to {peer} failed: {e}"))
    }

    async fn call(&self, peer: &NodeId, request: Request) -> Result<Response, String> {
        let mut stream = self.connect(peer).await?;
        write_message(&mut stream, &request).await.map_err(|e| e.to_string())?;
        read_message(&mut stream).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Transport for TcpClient {
    async fn request_vote(&self, peer: &NodeId, req: RequestVoteRequest) -> Result<RequestVoteResponse, TransportError> {
        match self.call(peer, Request::RequestVote(req)).await {
            Ok(Response::RequestVote(resp)) => Ok(resp),
            Ok(_) => Err(TransportError::Unreachable(peer.clone(), "unexpected response shape".into())),
            Err(e) => Err(TransportError::Unreachable(peer.clone(), e)),
        }
    }

    async fn append_entries(&self, peer: &NodeId, req: AppendEntriesRequest) -> Result<AppendEntriesResponse, TransportError> {
        match self.call(peer, Request::AppendEntries(req)).await {
            Ok(Response::AppendEntries(resp)) => Ok(resp),
            Ok(_) => Err(TransportError::Unreachable(peer.clone(), "unexpected response shape".into())),
            Err(e) => Err(TransportError::Unreachable(peer.clone(), e)),
        }
    }
}

#[async_trait]
impl JobSourceClient for TcpClient {
    async fn poll(&self, leader: &NodeId, max: usize) -> Result<Vec<Job>, JobSourceError> {
        match self.call(leader, Request::PollJobs { node_id: leader.clone(), max }).await {
            Ok(Response::Jobs(jobs)) => Ok(jobs),
            _ => Err(JobSourceError::NoReachableLeader(1)),
        }
    }

    async fn acknowledge(&self, leader: &NodeId, job_id: JobId, outcome: ExecutionOutcome) -> Result<(), JobSourceError> {
        match self.call(leader, Request::AcknowledgeJob { job_id, outcome }).await {
            Ok(Response::Acknowledged) => Ok(()),
            _ => Err(JobSourceError::NoReachableLeader(1)),
        }
    }

    async fn heartbeat(&self, leader: &NodeId, node_id: NodeId, current_load: usize) -> Result<HeartbeatResponse, JobSourceError> {
        match self.call(leader, Request::SendHeartbeat { node_id, current_load }).await {
            Ok(Response::Heartbeat(resp)) => Ok(resp),
            _ => Err(JobSourceError::NoReachableLeader(1)),
        }
    }
}

#[allow(dead_code)]
fn _assert_protocol_error_is_used(_e: ProtocolError) {}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
