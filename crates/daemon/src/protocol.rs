// SPDX-License-Identifier: MIT

//! Wire protocol for both intra-cluster Raft RPC and worker/client traffic,
//! carried over a single length-prefixed JSON framing on every TCP
//! connection the daemon accepts (spec §6 External Interfaces).

use raftq_core::job::{Job, JobId};
use raftq_core::NodeId;
use raftq_engine::{ExecutionOutcome, HeartbeatResponse};
use raftq_raft::{AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },
    #[error("connection closed")]
    ConnectionClosed,
    #[error("timed out waiting for a response")]
    Timeout,
}

/// Every request a node can receive over its RPC port: the two Raft RPCs
/// plus the worker/client surface from spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    RequestVote(RequestVoteRequest),
    AppendEntries(AppendEntriesRequest),
    SubmitJob { job_id: JobId, payload: serde_json::Value, timeout: Duration },
    PollJobs { node_id: NodeId, max: usize },
    AcknowledgeJob { job_id: JobId, outcome: ExecutionOutcome },
    RegisterWorker { node_id: NodeId, address: String, capacity: usize, tags: Vec<String> },
    SendHeartbeat { node_id: NodeId, current_load: usize },
    GetStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    RequestVote(RequestVoteResponse),
    AppendEntries(AppendEntriesResponse),
    JobSubmitted { job_id: JobId },
    Jobs(Vec<Job>),
    Acknowledged,
    Registered,
    Heartbeat(HeartbeatResponse),
    /// Returned for any request this node cannot service because it is
    /// not the Raft leader; `leader_hint` carries the last known leader
    /// id so the caller can redirect without a fresh round of discovery.
    NotLeader { leader_hint: Option<NodeId> },
    Error(String),
    Status(NodeStatus),
}

/// A point-in-time summary for the CLI's `status` command: enough to see
/// whether a node is healthy and how the queue is shaped, without exposing
/// full job records over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub is_leader: bool,
    pub leader_hint: Option<NodeId>,
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub dead: usize,
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge { size: bytes.len(), max: MAX_MESSAGE_SIZE });
    }
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(ProtocolError::ConnectionClosed),
        Err(e) => return Err(ProtocolError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge { size: len, max: MAX_MESSAGE_SIZE });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(e)
        }
    })?;
    Ok(serde_json::from_slice(&buf)?)
}

pub async fn read_request<R>(reader: &mut R) -> Result<Request, ProtocolError>
where
    R: AsyncReadExt + Unpin,
{
    tokio::time::timeout(DEFAULT_TIMEOUT, read_message(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), ProtocolError>
where
    W: AsyncWriteExt + Unpin,
{
    tokio::time::timeout(DEFAULT_TIMEOUT, write_message(writer, response))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
