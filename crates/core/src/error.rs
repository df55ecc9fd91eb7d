// SPDX-License-Identifier: MIT

//! Error kinds for the job state machine.

use thiserror::Error;

/// A violation of one of the state machine's structural invariants.
///
/// Surfaced by [`crate::job::JobStateMachine::validate`]; callers treat this as
/// a programming-error signal rather than a retryable condition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Invariant {
    #[error("job {0} is present in more than one logical set")]
    SetPartitionViolated(String),
    #[error("job {0} status field does not match its containing set")]
    StatusMismatch(String),
    #[error("in-flight job {0} is missing a deadline or worker_id")]
    InFlightMissingFields(String),
}

/// Errors returned by [`crate::job::JobStateMachine`] mutators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("job {0} already exists")]
    DuplicateJob(String),
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} is in a terminal state and cannot transition")]
    Terminal(String),
    #[error(transparent)]
    Invariant(#[from] Invariant),
}
