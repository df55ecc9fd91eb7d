// SPDX-License-Identifier: MIT

//! The RPC listener: accepts TCP connections and services both intra-
//! cluster Raft RPCs and worker/client requests on the same port, the way
//! the teacher's `Listener`/`ListenCtx` pair serviced every command over
//! one Unix socket. Adapted here from `UnixListener` to `TcpListener` since
//! cluster members run on separate hosts.

use crate::controller::Controller;
use crate::protocol::{read_request, write_response, NodeStatus, ProtocolError, Request, Response};
use raftq_core::worker::WorkerId;
use raftq_core::NodeId;
use raftq_engine::HeartbeatResponse;
use raftq_raft::RaftNode;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// Shared, per-connection context every handler needs. Grounded in the
/// teacher's `ListenCtx`: one struct holding everything a spawned
/// connection task reads, cloned cheaply via `Arc`.
pub struct ListenCtx {
    pub node_id: NodeId,
    pub controller: Arc<Controller>,
    pub raft: Option<Arc<RaftNode>>,
    pub shutdown: Arc<Notify>,
}

pub struct Listener {
    socket: TcpListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub async fn bind(addr: &str, ctx: Arc<ListenCtx>) -> std::io::Result<Self> {
        let socket = TcpListener::bind(addr).await?;
        Ok(Self { socket, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    /// Accept connections until `shutdown` fires, spawning one task per
    /// connection so a slow or stalled peer never blocks the others.
    pub async fn run(self) {
        loop {
            tokio::select! {
                accepted = self.socket.accept() => {
                    let Ok((stream, _addr)) = accepted else { continue };
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, ctx).await {
                            tracing::debug!(error = %e, "connection closed");
                        }
                    });
                }
                _ = self.ctx.shutdown.notified() => return,
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, ctx: Arc<ListenCtx>) -> Result<(), ProtocolError> {
    loop {
        let request = match read_request(&mut stream).await {
            Ok(req) => req,
            Err(ProtocolError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        let response = dispatch(&ctx, request).await;
        write_response(&mut stream, &response).await?;
    }
}

async fn dispatch(ctx: &ListenCtx, request: Request) -> Response {
    match request {
        Request::RequestVote(req) => match &ctx.raft {
            Some(raft) => Response::RequestVote(raft.handle_request_vote(req)),
            None => Response::Error("this node is not running Raft".into()),
        },
        Request::AppendEntries(req) => match &ctx.raft {
            Some(raft) => match raft.handle_append_entries(req) {
                Ok(resp) => Response::AppendEntries(resp),
                Err(e) => Response::Error(e.to_string()),
            },
            None => Response::Error("this node is not running Raft".into()),
        },
        Request::SubmitJob { job_id, payload, timeout } => {
            if !ctx.controller.is_leader() {
                return Response::NotLeader { leader_hint: ctx.controller.leader_hint(&ctx.node_id) };
            }
            match ctx.controller.submit_job(job_id.clone(), payload, timeout).await {
                Ok(()) => Response::JobSubmitted { job_id },
                Err(e) => Response::Error(e.to_string()),
            }
        }
        Request::PollJobs { node_id, max } => {
            if !ctx.controller.is_leader() {
                return Response::NotLeader { leader_hint: ctx.controller.leader_hint(&ctx.node_id) };
            }
            let jobs = ctx.controller.handle_poll(WorkerId::new(node_id.as_str()), max);
            Response::Jobs(jobs)
        }
        Request::AcknowledgeJob { job_id, outcome } => {
            if !ctx.controller.is_leader() {
                return Response::NotLeader { leader_hint: ctx.controller.leader_hint(&ctx.node_id) };
            }
            match ctx.controller.handle_ack(job_id, outcome).await {
                Ok(()) => Response::Acknowledged,
                Err(e) => Response::Error(e.to_string()),
            }
        }
        Request::RegisterWorker { node_id, address, capacity, tags } => {
            ctx.controller.register_worker(node_id, address, capacity, tags);
            Response::Registered
        }
        Request::SendHeartbeat { node_id, current_load } => {
            let reregister = ctx.controller.record_heartbeat(&node_id, current_load);
            Response::Heartbeat(HeartbeatResponse { reregister })
        }
        Request::GetStatus => Response::Status(NodeStatus {
            node_id: ctx.node_id.clone(),
            is_leader: ctx.controller.is_leader(),
            leader_hint: ctx.controller.leader_hint(&ctx.node_id),
            pending: ctx.controller.pending_count(),
            in_flight: ctx.controller.in_flight_count(),
            completed: ctx.controller.completed_count(),
            dead: ctx.controller.dead_count(),
        }),
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
