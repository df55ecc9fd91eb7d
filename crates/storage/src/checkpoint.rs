// SPDX-License-Identifier: MIT

//! Background-thread checkpoint writer.
//!
//! The snapshot loop (spec §4.5) must not hold the state-machine lock or
//! the loop thread itself across a potentially slow fsync of a large
//! snapshot. `Checkpointer` clones the [`Snapshot`] on the caller's thread
//! (cheap relative to serialize+compress+fsync) and performs the actual
//! write on a background thread, signaling completion through a channel.
//!
//! ```text
//! snapshot loop thread                  background thread
//! ---------------------                 -----------------
//! snapshot_view() + metadata
//! clone into Snapshot        ---------->  serialize (JSON)
//! continue other loop work                compress (zstd)
//!                                         write tmp file + fsync
//!                                         rename over target (atomic)
//!                                         fsync containing directory
//!                             <----------  send CheckpointResult
//! ```
//!
//! The directory fsync is what makes the rename itself durable; skipping it
//! would let a crash leave the directory entry pointing at stale data even
//! though the new file's bytes reached disk.

use crate::snapshot::{Snapshot, SnapshotError, SnapshotStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("a checkpoint is already in progress")]
    InProgress,
    #[error("checkpoint background thread failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct CheckpointResult {
    pub last_applied_seq: u64,
}

/// A handle to an in-flight background checkpoint.
///
/// The owning [`Checkpointer`] stays marked in-progress until this handle's
/// result has been observed via `wait()` or a `try_wait()` that returns
/// `Some` — not merely until the background thread happens to finish. A
/// dropped, never-waited-on handle leaves the checkpointer permanently
/// marked in-progress, which is deliberate: a caller that starts a
/// checkpoint and walks away without ever checking its result has a bug.
#[derive(Debug)]
pub struct CheckpointHandle {
    receiver: mpsc::Receiver<Result<CheckpointResult, CheckpointError>>,
    handle: Option<JoinHandle<()>>,
    in_progress: Arc<AtomicBool>,
}

impl CheckpointHandle {
    /// Block until the checkpoint completes.
    pub fn wait(mut self) -> Result<CheckpointResult, CheckpointError> {
        let result = self
            .receiver
            .recv()
            .map_err(|_| CheckpointError::Failed("background thread dropped the channel".into()))?;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.in_progress.store(false, Ordering::Release);
        result
    }

    /// Non-blocking poll; returns `None` if still running.
    pub fn try_wait(&mut self) -> Option<Result<CheckpointResult, CheckpointError>> {
        match self.receiver.try_recv() {
            Ok(result) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                self.in_progress.store(false, Ordering::Release);
                Some(result)
            }
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.in_progress.store(false, Ordering::Release);
                Some(Err(CheckpointError::Failed(
                    "background thread dropped the channel".into(),
                )))
            }
        }
    }
}

/// Drives background checkpoint writes against a [`SnapshotStore`].
pub struct Checkpointer {
    store: Arc<SnapshotStore>,
    compression_level: i32,
    in_progress: Arc<AtomicBool>,
}

impl Checkpointer {
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            store: Arc::new(store),
            compression_level: 3,
            in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Start a background checkpoint write. Returns an error if a previous
    /// checkpoint's handle was never waited on (its result, and therefore
    /// its completion, was never observed).
    pub fn start(&mut self, snapshot: Snapshot) -> Result<CheckpointHandle, CheckpointError> {
        if self.in_progress.swap(true, Ordering::AcqRel) {
            return Err(CheckpointError::InProgress);
        }

        let (tx, rx) = mpsc::channel();
        let store = self.store.clone();
        let level = self.compression_level;
        let in_progress = self.in_progress.clone();

        let handle = std::thread::spawn(move || {
            let result = store
                .write_with_level(&snapshot, level)
                .map(|()| CheckpointResult {
                    last_applied_seq: snapshot.last_applied_seq,
                })
                .map_err(CheckpointError::from);
            let _ = tx.send(result);
        });

        Ok(CheckpointHandle {
            receiver: rx,
            handle: Some(handle),
            in_progress,
        })
    }

    /// Write synchronously on the caller's thread — used on the shutdown
    /// path, where there is no further loop work to overlap the I/O with.
    pub fn checkpoint_sync(&self, snapshot: &Snapshot) -> Result<CheckpointResult, CheckpointError> {
        self.store.write_with_level(snapshot, self.compression_level)?;
        Ok(CheckpointResult {
            last_applied_seq: snapshot.last_applied_seq,
        })
    }
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
