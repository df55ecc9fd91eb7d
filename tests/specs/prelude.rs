//! Shared helpers for the end-to-end scenarios in spec.md §8. Every
//! scenario runs one or more real `raftqd` nodes in-process, talking to
//! them over real TCP sockets exactly as an external client would — the
//! only thing "faked" is the clock, nowhere.

#![allow(dead_code)]

pub use raftq_daemon::lifecycle;
pub use raftq_daemon::lifecycle::RunningNode;
pub use raftq_daemon::protocol::{Request, Response};

use raftq_core::job::JobId;
use raftq_core::NodeId;
use raftq_daemon::config::{Config, PeerConfig};
use raftq_daemon::metrics::NoopMetrics;
use raftq_daemon::protocol::{read_message, write_message};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Binds an ephemeral port and immediately releases it, for handing an
/// address to a `Config` before the real listener binds it for real. A
/// small, accepted race: fine for tests, not for production wiring.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn single_node_config(state_dir: &Path, node_id: &str, worker_count: usize) -> Config {
    Config {
        node_id: NodeId::new(node_id),
        rpc_bind: format!("127.0.0.1:{}", free_port()),
        peers: Vec::new(),
        state_dir: state_dir.to_path_buf(),
        wal_path: state_dir.join("wal").join("events.wal"),
        snapshot_path: state_dir.join("snapshot.bin"),
        raft_log_path: state_dir.join("raft.log"),
        worker_count,
        task_timeout: Duration::from_secs(5),
        snapshot_interval: Duration::from_millis(200),
        max_retry: 3,
        wal_buffer_size: 100,
        election_timeout_base: Duration::from_millis(150),
        heartbeat_interval: Duration::from_millis(50),
        metrics_port: None,
        disable_dispatch_loop: worker_count == 0,
    }
}

/// A cluster's worth of configs, each one's `peers` listing every node
/// (including itself, filtered out by `Config::peer_ids`).
pub fn cluster_configs(state_dir: &Path, node_ids: &[&str]) -> Vec<Config> {
    let addrs: Vec<(NodeId, String)> = node_ids
        .iter()
        .map(|id| (NodeId::new(*id), format!("127.0.0.1:{}", free_port())))
        .collect();
    let peers: Vec<PeerConfig> = addrs
        .iter()
        .map(|(node_id, address)| PeerConfig { node_id: node_id.clone(), address: address.clone() })
        .collect();

    addrs
        .iter()
        .map(|(node_id, address)| Config {
            node_id: node_id.clone(),
            rpc_bind: address.clone(),
            peers: peers.clone(),
            state_dir: state_dir.join(node_id.as_str()),
            wal_path: state_dir.join(node_id.as_str()).join("wal").join("events.wal"),
            snapshot_path: state_dir.join(node_id.as_str()).join("snapshot.bin"),
            raft_log_path: state_dir.join(node_id.as_str()).join("raft.log"),
            worker_count: 0,
            task_timeout: Duration::from_secs(5),
            snapshot_interval: Duration::from_secs(3600),
            max_retry: 3,
            wal_buffer_size: 100,
            election_timeout_base: Duration::from_millis(100),
            heartbeat_interval: Duration::from_millis(30),
            metrics_port: None,
            disable_dispatch_loop: true,
        })
        .collect()
}

pub async fn start(config: Config) -> RunningNode {
    lifecycle::startup(config, Arc::new(NoopMetrics)).await.unwrap()
}

pub async fn call(addr: SocketAddr, request: Request) -> Response {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_message(&mut stream, &request).await.unwrap();
    read_message(&mut stream).await.unwrap()
}

/// Submits a job against whichever node in `addrs` currently accepts it,
/// following `NotLeader` redirects and retrying the full set on failure —
/// the same rediscovery a `RemoteJobSource` performs, inlined here since
/// tests talk raw RPC rather than going through the worker pool.
pub async fn submit_until_accepted(addrs: &[SocketAddr], job_id: JobId, payload: serde_json::Value, timeout: Duration) {
    for _ in 0..50 {
        for &addr in addrs {
            let Ok(mut stream) = TcpStream::connect(addr).await else { continue };
            let request = Request::SubmitJob { job_id: job_id.clone(), payload: payload.clone(), timeout };
            if write_message(&mut stream, &request).await.is_err() {
                continue;
            }
            match read_message::<_, Response>(&mut stream).await {
                Ok(Response::JobSubmitted { .. }) => return,
                _ => continue,
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("no node in {addrs:?} ever accepted job {job_id}");
}

/// Polls `condition` until it returns true or `max_wait` elapses.
pub async fn wait_until(max_wait: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A trivial always-succeeding subprocess payload for `CommandExecutor`.
pub fn ok_payload() -> serde_json::Value {
    serde_json::json!({ "program": "true", "args": [] })
}

/// A payload that fails `fail_count` times (via a counter file under
/// `dir`) before succeeding — enough to drive the retry-then-succeed and
/// exhausted-retries scenarios with the real `CommandExecutor`, no fake
/// needed.
pub fn flaky_payload(dir: &Path, job_name: &str, fail_count: u32) -> serde_json::Value {
    let counter = dir.join(format!("{job_name}.count"));
    let script = format!(
        "n=$(cat {counter} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {counter}; [ $n -gt {fail_count} ]",
        counter = counter.display(),
        fail_count = fail_count,
    );
    serde_json::json!({ "program": "sh", "args": ["-c", script] })
}

pub fn always_fails_payload(dir: &Path, job_name: &str) -> serde_json::Value {
    flaky_payload(dir, job_name, u32::MAX)
}
