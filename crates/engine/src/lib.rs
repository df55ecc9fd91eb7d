// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The Worker Pool and Job Source: the boundary between a running
//! Controller (or a remote leader) and the units that actually execute
//! job payloads.

pub mod executor;
pub mod job_source;
pub mod pool;
pub mod scheduler;

pub use executor::{CommandExecutor, ExecutionOutcome, FakeExecutor, JobExecutor};
pub use job_source::{
    HeartbeatResponse, JobSource, JobSourceClient, JobSourceError, LocalAckMessage, LocalJobSource,
    LocalPollRequest, RemoteJobSource,
};
pub use pool::WorkerPoolConfig;
pub use scheduler::Scheduler;
