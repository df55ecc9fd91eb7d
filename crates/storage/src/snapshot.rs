// SPDX-License-Identifier: MIT

//! Atomic snapshot persistence: a partial view of hot job state (pending +
//! in-flight) plus the metadata needed to resume WAL replay and Raft.
//!
//! Completed and dead jobs are deliberately omitted — they are absorbing
//! terminal states, so their absence after recovery is semantically
//! equivalent to an empty set. This shrinks the snapshot to roughly the
//! working-set size rather than the lifetime job count.

use crate::migration::MigrationRegistry;
use chrono::{DateTime, Utc};
use raftq_core::job::SnapshotData;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current snapshot schema version written by this build.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(
        "snapshot schema version {found} cannot be loaded by a build expecting {expected} (no migration path): operator intervention required"
    )]
    VersionMismatch { found: u32, expected: u32 },
}

/// A partial, point-in-time snapshot of the job queue's hot state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    /// Highest WAL `seq` reflected in this snapshot.
    pub last_applied_seq: u64,
    pub raft_last_included_index: u64,
    pub raft_last_included_term: u64,
    pub data: SnapshotData,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(
        last_applied_seq: u64,
        raft_last_included_index: u64,
        raft_last_included_term: u64,
        data: SnapshotData,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: CURRENT_SNAPSHOT_VERSION,
            last_applied_seq,
            raft_last_included_index,
            raft_last_included_term,
            data,
            created_at,
        }
    }
}

/// Owns the canonical snapshot path and performs atomic write/read.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Serialize and zstd-compress to a temporary path, fsync, then
    /// atomically rename over the target path, then fsync the containing
    /// directory (required so the rename itself is durable — otherwise a
    /// crash can leave the directory entry pointing at the old inode even
    /// though the new file's bytes are safely on disk). On any failure
    /// before rename, the previous snapshot remains valid and loadable.
    pub fn write(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        self.write_with_level(snapshot, DEFAULT_COMPRESSION_LEVEL)
    }

    pub(crate) fn write_with_level(&self, snapshot: &Snapshot, level: i32) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json_bytes = serde_json::to_vec(snapshot)?;
        let compressed = zstd::encode_all(&json_bytes[..], level)
            .map_err(SnapshotError::Io)?;

        let tmp_path = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&compressed)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                dir.sync_all()?;
            }
        }

        Ok(())
    }

    /// Returns `Ok(None)` if no snapshot file exists. A version mismatch or
    /// malformed file is a fatal error — corruption is never silently
    /// discarded; the operator must intervene.
    pub fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let compressed = fs::read(&self.path)?;
        let json_bytes = zstd::decode_all(&compressed[..]).map_err(SnapshotError::Io)?;
        let raw: serde_json::Value = serde_json::from_slice(&json_bytes)?;

        let found_version = raw
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(CURRENT_SNAPSHOT_VERSION);

        let migrated = MigrationRegistry::new()
            .migrate_to(raw, CURRENT_SNAPSHOT_VERSION)
            .map_err(|_| SnapshotError::VersionMismatch {
                found: found_version,
                expected: CURRENT_SNAPSHOT_VERSION,
            })?;

        let snapshot: Snapshot = serde_json::from_value(migrated)?;
        Ok(Some(snapshot))
    }
}

const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out. Used
/// only by the WAL's corrupt-record quarantine — snapshots themselves are
/// never silently quarantined, per the fatal-on-corruption policy above.
pub(crate) fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
