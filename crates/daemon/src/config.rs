// SPDX-License-Identifier: MIT

//! Daemon configuration: every option enumerated in spec.md §6, loaded from
//! a TOML file with environment variable overrides. The core never touches
//! the filesystem for configuration itself — this struct is the boundary.

use raftq_core::NodeId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("invalid environment override for {0}: {1}")]
    Env(&'static str, String),
}

/// A cluster peer's node id and RPC address.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PeerConfig {
    pub node_id: NodeId,
    pub address: String,
}

fn default_worker_count() -> usize {
    4
}
fn default_task_timeout_ms() -> u64 {
    5_000
}
fn default_snapshot_interval_ms() -> u64 {
    30_000
}
fn default_max_retry() -> u32 {
    3
}
fn default_wal_buffer_size() -> usize {
    100
}
fn default_election_timeout_base_ms() -> u64 {
    150
}
fn default_heartbeat_interval_ms() -> u64 {
    50
}
fn default_rpc_bind() -> String {
    "127.0.0.1:7600".to_string()
}

/// Raw, directly-deserializable shape of the TOML file. Durations are
/// expressed in milliseconds on the wire (TOML has no native duration
/// type); [`Config`] converts these into `Duration` once at load time so
/// the rest of the codebase never juggles raw integers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct RawConfig {
    node_id: NodeId,
    #[serde(default = "default_rpc_bind")]
    rpc_bind: String,
    #[serde(default)]
    peers: Vec<PeerConfig>,
    #[serde(default)]
    state_dir: Option<PathBuf>,
    #[serde(default)]
    wal_path: Option<PathBuf>,
    #[serde(default)]
    snapshot_path: Option<PathBuf>,
    #[serde(default)]
    raft_log_path: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    worker_count: usize,
    #[serde(default = "default_task_timeout_ms")]
    task_timeout_ms: u64,
    #[serde(default = "default_snapshot_interval_ms")]
    snapshot_interval_ms: u64,
    #[serde(default = "default_max_retry")]
    max_retry: u32,
    #[serde(default = "default_wal_buffer_size")]
    wal_buffer_size: usize,
    #[serde(default = "default_election_timeout_base_ms")]
    election_timeout_base_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    heartbeat_interval_ms: u64,
    #[serde(default)]
    metrics_port: Option<u16>,
    #[serde(default)]
    disable_dispatch_loop: bool,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new("node-1"),
            rpc_bind: default_rpc_bind(),
            peers: Vec::new(),
            state_dir: None,
            wal_path: None,
            snapshot_path: None,
            raft_log_path: None,
            worker_count: default_worker_count(),
            task_timeout_ms: default_task_timeout_ms(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            max_retry: default_max_retry(),
            wal_buffer_size: default_wal_buffer_size(),
            election_timeout_base_ms: default_election_timeout_base_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            metrics_port: None,
            disable_dispatch_loop: false,
        }
    }
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_id: NodeId,
    pub rpc_bind: String,
    pub peers: Vec<PeerConfig>,
    pub state_dir: PathBuf,
    pub wal_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub raft_log_path: PathBuf,
    pub worker_count: usize,
    pub task_timeout: Duration,
    pub snapshot_interval: Duration,
    pub max_retry: u32,
    pub wal_buffer_size: usize,
    pub election_timeout_base: Duration,
    pub heartbeat_interval: Duration,
    pub metrics_port: Option<u16>,
    pub disable_dispatch_loop: bool,
}

impl Config {
    /// Load from a TOML file, then apply `RAFTQ_*` environment overrides.
    /// `state_dir` resolution mirrors the teacher's precedence: an explicit
    /// `state_dir` key, then `RAFTQ_STATE_DIR`, then a `raftq/<node_id>`
    /// directory under `XDG_STATE_HOME` or `~/.local/state`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_owned(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::Parse(path.to_owned(), e))?
        } else {
            RawConfig::default()
        };
        Self::from_raw(raw)
    }

    fn from_raw(mut raw: RawConfig) -> Result<Self, ConfigError> {
        if let Ok(v) = std::env::var("RAFTQ_NODE_ID") {
            raw.node_id = NodeId::new(v);
        }
        if let Ok(v) = std::env::var("RAFTQ_RPC_BIND") {
            raw.rpc_bind = v;
        }
        if let Ok(v) = std::env::var("RAFTQ_WORKER_COUNT") {
            raw.worker_count = v
                .parse()
                .map_err(|_| ConfigError::Env("RAFTQ_WORKER_COUNT", v))?;
        }
        if let Ok(v) = std::env::var("RAFTQ_MAX_RETRY") {
            raw.max_retry = v.parse().map_err(|_| ConfigError::Env("RAFTQ_MAX_RETRY", v))?;
        }
        if let Ok(v) = std::env::var("RAFTQ_DISABLE_DISPATCH_LOOP") {
            raw.disable_dispatch_loop = v == "1" || v.eq_ignore_ascii_case("true");
        }

        let state_dir = if let Some(dir) = raw.state_dir.clone() {
            dir
        } else if let Ok(dir) = std::env::var("RAFTQ_STATE_DIR") {
            PathBuf::from(dir)
        } else {
            default_state_dir(&raw.node_id)?
        };

        Ok(Config {
            wal_path: raw.wal_path.clone().unwrap_or_else(|| state_dir.join("wal").join("events.wal")),
            snapshot_path: raw.snapshot_path.clone().unwrap_or_else(|| state_dir.join("snapshot.bin")),
            raft_log_path: raw.raft_log_path.clone().unwrap_or_else(|| state_dir.join("raft.log")),
            node_id: raw.node_id,
            rpc_bind: raw.rpc_bind,
            peers: raw.peers,
            worker_count: raw.worker_count,
            task_timeout: Duration::from_millis(raw.task_timeout_ms),
            snapshot_interval: Duration::from_millis(raw.snapshot_interval_ms),
            max_retry: raw.max_retry,
            wal_buffer_size: raw.wal_buffer_size,
            election_timeout_base: Duration::from_millis(raw.election_timeout_base_ms),
            heartbeat_interval: Duration::from_millis(raw.heartbeat_interval_ms),
            metrics_port: raw.metrics_port,
            disable_dispatch_loop: raw.disable_dispatch_loop,
            state_dir,
        })
    }

    /// Peers other than this node, keyed by id — the set Raft replicates to.
    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.peers
            .iter()
            .map(|p| p.node_id.clone())
            .filter(|id| *id != self.node_id)
            .collect()
    }

    pub fn peer_addresses(&self) -> HashMap<NodeId, String> {
        self.peers.iter().map(|p| (p.node_id.clone(), p.address.clone())).collect()
    }
}

fn default_state_dir(node_id: &NodeId) -> Result<PathBuf, ConfigError> {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("raftq").join(node_id.as_str()));
    }
    let home = std::env::var("HOME").map_err(|_| ConfigError::Env("HOME", "not set".into()))?;
    Ok(PathBuf::from(home).join(".local/state/raftq").join(node_id.as_str()))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
