// SPDX-License-Identifier: MIT

//! The worker registry: the master's record of which workers exist, where
//! they live, and how much work they can take (spec §6 `RegisterWorker`,
//! §4.6 heartbeat re-register signal).

use chrono::{DateTime, Utc};
use raftq_core::NodeId;
use std::collections::HashMap;

/// What the master knows about one worker between registrations.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub address: String,
    pub capacity: usize,
    pub tags: Vec<String>,
    pub current_load: usize,
    pub last_heartbeat: DateTime<Utc>,
}

/// In-memory worker directory, guarded the same way `Controller` guards its
/// other mutable state. Not part of the WAL or Raft log: a worker's
/// registration is re-derived from its next heartbeat if a leader restarts
/// or a new one is elected, so losing this table on failover is harmless.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: parking_lot::Mutex<HashMap<NodeId, WorkerInfo>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node_id: NodeId, address: String, capacity: usize, tags: Vec<String>, now: DateTime<Utc>) {
        self.workers.lock().insert(
            node_id,
            WorkerInfo { address, capacity, tags, current_load: 0, last_heartbeat: now },
        );
    }

    /// Record a heartbeat's load and timestamp. Returns `true` if the
    /// worker should re-register — it heartbeated without ever (or not
    /// recently enough) registering its capacity and tags.
    pub fn heartbeat(&self, node_id: &NodeId, current_load: usize, now: DateTime<Utc>) -> bool {
        let mut workers = self.workers.lock();
        match workers.get_mut(node_id) {
            Some(info) => {
                info.current_load = current_load;
                info.last_heartbeat = now;
                false
            }
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, node_id: &NodeId) -> Option<WorkerInfo> {
        self.workers.lock().get(node_id).cloned()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
