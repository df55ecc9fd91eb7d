// SPDX-License-Identifier: MIT

//! `raftq status` - print a single node's queue shape and Raft role.

use anyhow::{bail, Context, Result};
use clap::Args;
use raftq_daemon::protocol::{read_message, write_message, Request, Response};
use std::net::SocketAddr;
use tokio::net::TcpStream;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Address of the node to query
    #[arg(long, value_name = "HOST:PORT")]
    pub addr: SocketAddr,
}

pub async fn status(args: StatusArgs) -> Result<()> {
    let mut stream = TcpStream::connect(args.addr).await.with_context(|| format!("connecting to {}", args.addr))?;
    write_message(&mut stream, &Request::GetStatus).await?;
    let response: Response = read_message(&mut stream).await?;

    let status = match response {
        Response::Status(status) => status,
        Response::Error(e) => bail!("{} returned an error: {e}", args.addr),
        other => bail!("{} returned an unexpected response to GetStatus: {other:?}", args.addr),
    };

    println!("node:      {}", status.node_id);
    println!("role:      {}", if status.is_leader { "leader" } else { "follower" });
    if let Some(hint) = &status.leader_hint {
        println!("leader:    {hint}");
    }
    println!("pending:   {}", status.pending);
    println!("in_flight: {}", status.in_flight);
    println!("completed: {}", status.completed);
    println!("dead:      {}", status.dead);
    Ok(())
}
