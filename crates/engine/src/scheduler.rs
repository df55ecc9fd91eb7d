// SPDX-License-Identifier: MIT

//! Per-job timeout tracking for the timeout loop (spec §4.5).

use raftq_core::job::JobId;
use std::collections::HashMap;
use std::time::Instant;

/// Tracks in-flight deadlines and reports which have elapsed.
#[derive(Debug, Default)]
pub struct Scheduler {
    deadlines: HashMap<JobId, Instant>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the deadline for a dispatched job.
    pub fn set_deadline(&mut self, job_id: JobId, deadline: Instant) {
        self.deadlines.insert(job_id, deadline);
    }

    /// Stop tracking a job — call on ack, retry, or completion.
    pub fn clear(&mut self, job_id: &JobId) {
        self.deadlines.remove(job_id);
    }

    /// Returns the ids whose deadline has passed, and stops tracking them.
    pub fn fired(&mut self, now: Instant) -> Vec<JobId> {
        let expired: Vec<JobId> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.deadlines.remove(id);
        }
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().copied().min()
    }

    pub fn is_tracking(&self, job_id: &JobId) -> bool {
        self.deadlines.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
