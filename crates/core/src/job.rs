// SPDX-License-Identifier: MIT

//! The job state machine: job sets, their invariants, and the mutators that
//! the controller and WAL/Raft replay drive.

use crate::error::{Invariant, StateError};
use crate::worker::WorkerId;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

crate::define_id! {
    /// Opaque, caller-supplied identifier, unique per job across the queue's
    /// lifetime.
    pub struct JobId;
}

/// The four logical job states. The first two are "hot" (persisted in
/// snapshots); the last two are "cold," absorbing, and omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum JobStatus {
    Pending,
    InFlight,
    Completed,
    Dead,
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_millis().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

/// A single job in the queue.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Opaque payload handed to the executor; the state machine never
    /// inspects it.
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Number of execution attempts so far; monotonically increases.
    pub attempt: u32,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Absolute time by which the current IN_FLIGHT attempt must complete.
    /// Set on dispatch, cleared on any terminal or pending transition.
    pub deadline: Option<DateTime<Utc>>,
    /// Worker handling the current attempt; only meaningful while IN_FLIGHT.
    pub worker_id: Option<WorkerId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Construct a new job in PENDING state.
    pub fn new(id: JobId, payload: serde_json::Value, timeout: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            status: JobStatus::Pending,
            attempt: 0,
            timeout,
            deadline: None,
            worker_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A deep, point-in-time copy of the hot job sets, produced by
/// [`JobStateMachine::snapshot_view`] and consumed by
/// [`JobStateMachine::restore`]. Completed and dead jobs are deliberately
/// excluded — they are absorbing terminal states and reconstructable as
/// empty sets without changing future behavior.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SnapshotData {
    pub pending: Vec<Job>,
    pub in_flight: IndexMap<JobId, Job>,
}

/// In-memory representation of the job queue. Owns the four logical sets and
/// enforces their invariants. Every mutator here is idempotent with respect
/// to replay: applying the same WAL record or Raft-committed command twice
/// produces the same resulting state.
#[derive(Debug, Default)]
pub struct JobStateMachine {
    pending: VecDeque<Job>,
    in_flight: IndexMap<JobId, Job>,
    completed: HashMap<JobId, Job>,
    dead: HashMap<JobId, Job>,
}

impl JobStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    fn contains(&self, id: &JobId) -> bool {
        self.pending.iter().any(|j| &j.id == id)
            || self.in_flight.contains_key(id)
            || self.completed.contains_key(id)
            || self.dead.contains_key(id)
    }

    /// Append to the pending tail. Fails if `id` is already present in any
    /// set.
    pub fn enqueue(&mut self, job: Job) -> Result<(), StateError> {
        if self.contains(&job.id) {
            return Err(StateError::DuplicateJob(job.id.to_string()));
        }
        self.pending.push_back(job);
        Ok(())
    }

    /// FIFO remove from the pending head.
    pub fn pop_pending(&mut self) -> Option<Job> {
        self.pending.pop_front()
    }

    /// Move a job into IN_FLIGHT with the given deadline and worker. The
    /// source may be the pending queue (normal dispatch) or the in-flight
    /// map itself (a redispatch that refreshes deadline/worker without an
    /// intervening pending stage). Fails if the job is missing or terminal.
    pub fn mark_in_flight(
        &mut self,
        job_id: &JobId,
        deadline: DateTime<Utc>,
        worker_id: WorkerId,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        if let Some(job) = self.in_flight.get_mut(job_id) {
            job.deadline = Some(deadline);
            job.worker_id = Some(worker_id);
            job.updated_at = now;
            return Ok(());
        }
        if let Some(pos) = self.pending.iter().position(|j| &j.id == job_id) {
            let mut job = self
                .pending
                .remove(pos)
                .ok_or_else(|| StateError::NotFound(job_id.to_string()))?;
            job.status = JobStatus::InFlight;
            job.deadline = Some(deadline);
            job.worker_id = Some(worker_id);
            job.updated_at = now;
            self.in_flight.insert(job_id.clone(), job);
            return Ok(());
        }
        if self.completed.contains_key(job_id) || self.dead.contains_key(job_id) {
            return Err(StateError::Terminal(job_id.to_string()));
        }
        Err(StateError::NotFound(job_id.to_string()))
    }

    /// Pop the pending head directly into IN_FLIGHT under `worker_id`, with
    /// its deadline set to `now + job.timeout`, returning the now-dispatched
    /// job. `None` if the pending queue is empty. The single-step
    /// counterpart to calling `pop_pending` followed by `mark_in_flight` on
    /// the result, which cannot work directly since a job removed from
    /// every set is neither "from pending" nor "from in-flight" as far as
    /// `mark_in_flight` can tell.
    pub fn dispatch_next(&mut self, worker_id: WorkerId, now: DateTime<Utc>) -> Option<Job> {
        let mut job = self.pending.pop_front()?;
        let deadline = now + chrono::Duration::from_std(job.timeout).unwrap_or_else(|_| chrono::Duration::zero());
        job.status = JobStatus::InFlight;
        job.deadline = Some(deadline);
        job.worker_id = Some(worker_id);
        job.updated_at = now;
        self.in_flight.insert(job.id.clone(), job.clone());
        Some(job)
    }

    /// Move a job to the completed set. No-op if already completed; fails if
    /// the job is DEAD.
    pub fn mark_completed(&mut self, job_id: &JobId, now: DateTime<Utc>) -> Result<(), StateError> {
        if self.completed.contains_key(job_id) {
            return Ok(());
        }
        if self.dead.contains_key(job_id) {
            return Err(StateError::Terminal(job_id.to_string()));
        }
        let mut job = self.take_hot(job_id)?;
        job.status = JobStatus::Completed;
        job.deadline = None;
        job.worker_id = None;
        job.updated_at = now;
        self.completed.insert(job_id.clone(), job);
        Ok(())
    }

    /// Move a job to the dead set. Idempotent with respect to repeated
    /// calls; fails if the job is already COMPLETED (a different terminal
    /// state, so the transition is impossible).
    pub fn mark_dead(&mut self, job_id: &JobId, now: DateTime<Utc>) -> Result<(), StateError> {
        if self.dead.contains_key(job_id) {
            return Ok(());
        }
        if self.completed.contains_key(job_id) {
            return Err(StateError::Terminal(job_id.to_string()));
        }
        let mut job = self.take_hot(job_id)?;
        job.status = JobStatus::Dead;
        job.deadline = None;
        job.worker_id = None;
        job.updated_at = now;
        self.dead.insert(job_id.clone(), job);
        Ok(())
    }

    /// Move a job from in-flight back to the pending tail, incrementing
    /// `attempt` and clearing deadline/worker. Fails if the job is not
    /// in-flight.
    pub fn requeue(&mut self, job_id: &JobId, now: DateTime<Utc>) -> Result<(), StateError> {
        self.requeue_inner(job_id, now, true)
    }

    /// Same as [`Self::requeue`] but does not increment `attempt`. Used for
    /// startup recovery, where in-flight jobs at crash time are re-driven to
    /// pending without spending a retry (the chosen resolution for this
    /// system; see the open question on recovery-driven requeue).
    pub fn requeue_without_incrementing_attempt(
        &mut self,
        job_id: &JobId,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        self.requeue_inner(job_id, now, false)
    }

    fn requeue_inner(
        &mut self,
        job_id: &JobId,
        now: DateTime<Utc>,
        increment_attempt: bool,
    ) -> Result<(), StateError> {
        // Falls back to `pending` the same way `take_hot` does: WAL replay
        // treats Dispatch as a no-op, so a job whose Enqueue+Dispatch+Retry
        // all land since the last snapshot is still in `pending`, not
        // `in_flight`, when Retry replays. Without the fallback that Retry
        // would silently fail and the attempt increment would be lost.
        let mut job = match self.take_hot(job_id) {
            Ok(job) => job,
            Err(_) if self.completed.contains_key(job_id) || self.dead.contains_key(job_id) => {
                return Err(StateError::Terminal(job_id.to_string()));
            }
            Err(e) => return Err(e),
        };
        if increment_attempt {
            job.attempt += 1;
        }
        job.status = JobStatus::Pending;
        job.deadline = None;
        job.worker_id = None;
        job.updated_at = now;
        self.pending.push_back(job);
        Ok(())
    }

    /// Remove a job from whichever hot set (pending or in-flight) currently
    /// holds it, for transition into a terminal set.
    fn take_hot(&mut self, job_id: &JobId) -> Result<Job, StateError> {
        if let Some(job) = self.in_flight.shift_remove(job_id) {
            return Ok(job);
        }
        if let Some(pos) = self.pending.iter().position(|j| &j.id == job_id) {
            return self
                .pending
                .remove(pos)
                .ok_or_else(|| StateError::NotFound(job_id.to_string()));
        }
        Err(StateError::NotFound(job_id.to_string()))
    }

    /// Enumerate in-flight jobs whose deadline has passed (`deadline <=
    /// now`, so a timeout exactly at the deadline counts as expired). Ties
    /// are broken by insertion order into the in-flight map.
    pub fn get_expired(&self, now: DateTime<Utc>) -> Vec<JobId> {
        self.in_flight
            .iter()
            .filter_map(|(id, job)| match job.deadline {
                Some(deadline) if deadline <= now => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Produce a deep copy of pending and in-flight for the snapshot store.
    pub fn snapshot_view(&self) -> SnapshotData {
        SnapshotData {
            pending: self.pending.iter().cloned().collect(),
            in_flight: self.in_flight.clone(),
        }
    }

    /// Replace the entire state with the provided snapshot. The caller must
    /// guarantee no concurrent access. Completed and dead sets are reset to
    /// empty, per the partial-snapshot policy: they are absorbing and
    /// contribute nothing to future transitions.
    pub fn restore(&mut self, snapshot: SnapshotData) {
        self.pending = snapshot.pending.into_iter().collect();
        self.in_flight = snapshot.in_flight;
        self.completed.clear();
        self.dead.clear();
    }

    /// Check the set-partition invariant and in-flight field requirements.
    /// Used in tests and by the controller's periodic invariant audit.
    pub fn validate(&self) -> Result<(), Invariant> {
        let mut seen = HashSet::new();
        for job in &self.pending {
            if job.status != JobStatus::Pending {
                return Err(Invariant::StatusMismatch(job.id.to_string()));
            }
            if !seen.insert(&job.id) {
                return Err(Invariant::SetPartitionViolated(job.id.to_string()));
            }
        }
        for job in self.in_flight.values() {
            if job.status != JobStatus::InFlight {
                return Err(Invariant::StatusMismatch(job.id.to_string()));
            }
            if job.deadline.is_none() || job.worker_id.is_none() {
                return Err(Invariant::InFlightMissingFields(job.id.to_string()));
            }
            if !seen.insert(&job.id) {
                return Err(Invariant::SetPartitionViolated(job.id.to_string()));
            }
        }
        for job in self.completed.values() {
            if job.status != JobStatus::Completed {
                return Err(Invariant::StatusMismatch(job.id.to_string()));
            }
            if !seen.insert(&job.id) {
                return Err(Invariant::SetPartitionViolated(job.id.to_string()));
            }
        }
        for job in self.dead.values() {
            if job.status != JobStatus::Dead {
                return Err(Invariant::StatusMismatch(job.id.to_string()));
            }
            if !seen.insert(&job.id) {
                return Err(Invariant::SetPartitionViolated(job.id.to_string()));
            }
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn dead_count(&self) -> usize {
        self.dead.len()
    }

    pub fn status_of(&self, job_id: &JobId) -> Option<JobStatus> {
        if let Some(job) = self.in_flight.get(job_id) {
            return Some(job.status);
        }
        if let Some(job) = self.completed.get(job_id) {
            return Some(job.status);
        }
        if let Some(job) = self.dead.get(job_id) {
            return Some(job.status);
        }
        self.pending.iter().find(|j| &j.id == job_id).map(|j| j.status)
    }

    /// Full record of a job in any of the four sets, for callers (status
    /// RPCs, tests) that need more than just its status or attempt count.
    pub fn get(&self, job_id: &JobId) -> Option<&Job> {
        if let Some(job) = self.in_flight.get(job_id) {
            return Some(job);
        }
        if let Some(job) = self.completed.get(job_id) {
            return Some(job);
        }
        if let Some(job) = self.dead.get(job_id) {
            return Some(job);
        }
        self.pending.iter().find(|j| &j.id == job_id)
    }

    /// Current attempt count of a hot (pending or in-flight) job, used by
    /// the controller's result/timeout loops to decide whether a failure
    /// has exhausted `max_retry`. `None` if the job is terminal or unknown.
    pub fn attempt_of(&self, job_id: &JobId) -> Option<u32> {
        if let Some(job) = self.in_flight.get(job_id) {
            return Some(job.attempt);
        }
        self.pending.iter().find(|j| &j.id == job_id).map(|j| j.attempt)
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
