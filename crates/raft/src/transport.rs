// SPDX-License-Identifier: MIT

//! Peer transport abstraction. `RaftNode` is generic over this trait so
//! the consensus logic can be exercised with an in-process fake and wired,
//! in the daemon, to the real length-prefixed-JSON TCP client.

use crate::rpc::{AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse};
use async_trait::async_trait;
use raftq_core::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {0} unreachable: {1}")]
    Unreachable(NodeId, String),
    #[error("peer {0} did not respond before the timeout")]
    Timeout(NodeId),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request_vote(
        &self,
        peer: &NodeId,
        req: RequestVoteRequest,
    ) -> Result<RequestVoteResponse, TransportError>;

    async fn append_entries(
        &self,
        peer: &NodeId,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, TransportError>;
}
