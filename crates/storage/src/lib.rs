// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Durability engine: the write-ahead log and the partial-snapshot store.
//!
//! This crate owns all filesystem I/O for job-queue durability. It never
//! touches the job state machine directly — callers (the controller) drive
//! WAL writes and snapshot writes, then apply the resulting records to
//! `raftq_core::JobStateMachine` themselves.

mod checkpoint;
mod migration;
mod snapshot;
mod wal;

pub use checkpoint::{CheckpointError, CheckpointHandle, CheckpointResult, Checkpointer};
pub use migration::{Migration, MigrationError, MigrationRegistry};
pub use snapshot::{Snapshot, SnapshotError, SnapshotStore, CURRENT_SNAPSHOT_VERSION};
pub use wal::{Wal, WalEntry, WalError, WalEventType};
