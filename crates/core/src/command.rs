// SPDX-License-Identifier: MIT

//! Commands carried by Raft log entries and, in single-node mode, applied
//! directly from the WAL.

use crate::job::{Job, JobId};
use serde::{Deserialize, Serialize};

/// Terminal outcome reported by the result loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    Completed,
    Dead,
}

/// A command decoded from `command_bytes` in a Raft log entry. Extensible:
/// new variants may be added without breaking the applier's exhaustive match
/// as long as it is updated in lockstep with the wire format's version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Admit one or more new jobs into the pending queue.
    Enqueue { jobs: Vec<Job> },
    /// Record a terminal outcome for a job's current attempt.
    Ack {
        job_id: JobId,
        status: AckStatus,
        result: Option<serde_json::Value>,
    },
    /// Send an in-flight job back to pending, incrementing its attempt.
    Retry { job_id: JobId },
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
