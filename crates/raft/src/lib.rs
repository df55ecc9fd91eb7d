// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Raft consensus: a replicated log, leader election, and a commit-index
//! applier, generic over the network transport so the state machine can be
//! driven by an in-process fake in tests and by the daemon's real RPC
//! client in production.

pub mod applier;
pub mod log;
pub mod node;
pub mod rpc;
pub mod transport;

pub use log::{FileLogStore, LogEntry, LogError, LogStore, MemLogStore};
pub use node::{RaftConfig, RaftError, RaftNode, Role};
pub use rpc::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    RequestVoteRequest, RequestVoteResponse,
};
pub use transport::{Transport, TransportError};
