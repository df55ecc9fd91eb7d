// SPDX-License-Identifier: MIT

//! `raftq enqueue` - submit jobs read from a file to whichever node in a
//! given address list currently accepts them (the leader; followers
//! redirect).

use anyhow::{bail, Context, Result};
use clap::Args;
use raftq_core::job::JobId;
use raftq_daemon::protocol::{read_message, write_message, Request, Response};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Newline-delimited JSON file of jobs to submit
    #[arg(long, value_name = "PATH")]
    pub file: PathBuf,
    /// Address of a cluster node; repeat for every known node
    #[arg(long = "addr", value_name = "HOST:PORT", required = true)]
    pub addrs: Vec<SocketAddr>,
    /// Per-job execution timeout, in milliseconds, if not set in the file
    #[arg(long, default_value_t = 5_000)]
    pub default_timeout_ms: u64,
}

/// One line of the input file.
#[derive(Deserialize)]
struct JobSpec {
    id: JobId,
    payload: serde_json::Value,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

pub async fn enqueue(args: EnqueueArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.file).with_context(|| format!("reading {}", args.file.display()))?;

    let mut submitted = 0usize;
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let spec: JobSpec = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: not a valid job spec", args.file.display(), lineno + 1))?;
        let timeout = Duration::from_millis(spec.timeout_ms.unwrap_or(args.default_timeout_ms));

        submit_to_any(&args.addrs, spec.id, spec.payload, timeout).await?;
        submitted += 1;
    }

    println!("submitted {submitted} job(s)");
    Ok(())
}

async fn submit_to_any(addrs: &[SocketAddr], job_id: JobId, payload: serde_json::Value, timeout: Duration) -> Result<()> {
    let mut last_error = None;
    for &addr in addrs {
        let request = Request::SubmitJob { job_id: job_id.clone(), payload: payload.clone(), timeout };
        match call(addr, request).await {
            Ok(Response::JobSubmitted { .. }) => return Ok(()),
            Ok(Response::NotLeader { .. }) => continue,
            Ok(Response::Error(e)) => {
                bail!("node {addr} rejected job {job_id}: {e}");
            }
            Ok(other) => bail!("node {addr} returned an unexpected response to SubmitJob: {other:?}"),
            Err(e) => last_error = Some(e),
        }
    }
    match last_error {
        Some(e) => bail!("no node in {addrs:?} accepted job {job_id}; last connection error: {e}"),
        None => bail!("no node in {addrs:?} is currently the leader"),
    }
}

async fn call(addr: SocketAddr, request: Request) -> Result<Response, anyhow::Error> {
    let mut stream = TcpStream::connect(addr).await.with_context(|| format!("connecting to {addr}"))?;
    write_message(&mut stream, &request).await?;
    Ok(read_message(&mut stream).await?)
}
