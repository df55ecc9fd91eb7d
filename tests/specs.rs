//! Behavioral specifications for the end-to-end scenarios in spec.md §8.
//!
//! Each scenario runs one or more real `raftqd` nodes in-process and talks
//! to them over real TCP sockets via the wire protocol, exactly as an
//! external client or worker would.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

#[path = "specs/prelude.rs"]
mod prelude;

#[path = "specs/normal_completion.rs"]
mod normal_completion;
#[path = "specs/retry_then_succeed.rs"]
mod retry_then_succeed;
#[path = "specs/exhausted_retries.rs"]
mod exhausted_retries;
#[path = "specs/crash_recovery.rs"]
mod crash_recovery;
#[path = "specs/leader_failover.rs"]
mod leader_failover;
#[path = "specs/snapshot_size.rs"]
mod snapshot_size;
