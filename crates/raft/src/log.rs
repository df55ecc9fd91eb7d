// SPDX-License-Identifier: MIT

//! The Raft log store: a durable sequence keyed by `(term, index)`.
//!
//! Grounded in the same append/fsync/atomic-rename discipline as
//! `raftq_storage::wal::Wal` — a single append-only file, one JSON record
//! per line, replayed fully into an in-memory index on open. Log Store I/O
//! failure on append is fatal per spec: the node halts rather than continue
//! in a state it cannot safely replicate from.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no entry at index {0}")]
    MissingEntry(u64),
}

/// A single replicated log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    /// Opaque encoded command; decoded by the applier as
    /// `raftq_core::Command`.
    pub command_bytes: Vec<u8>,
}

/// Operations a Raft log must support: lookup by index, append, truncate a
/// conflicting suffix, and compact everything below a snapshot boundary.
pub trait LogStore: Send + Sync {
    fn first_index(&self) -> u64;
    fn last_index(&self) -> u64;
    fn term_at(&self, index: u64) -> Option<u64>;
    fn get(&self, index: u64) -> Option<LogEntry>;
    fn append(&mut self, entries: &[LogEntry]) -> Result<(), LogError>;
    /// Delete all entries at and after `from` (conflict resolution).
    fn delete_from(&mut self, from: u64) -> Result<(), LogError>;
    /// Drop all entries at or below `up_to_index`, recording the
    /// compaction boundary's term so future consistency checks against it
    /// still succeed.
    fn compact_up_to(&mut self, up_to_index: u64, up_to_term: u64) -> Result<(), LogError>;
    fn last_included_index(&self) -> u64;
    fn last_included_term(&self) -> u64;
}

/// A `LogStore` backed by an append-only file, mirroring the WAL's
/// open/scan/replay discipline.
pub struct FileLogStore {
    file: File,
    path: PathBuf,
    entries: VecDeque<LogEntry>,
    last_included_index: u64,
    last_included_term: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind")]
enum Record {
    Entry(LogEntry),
    Compact { up_to_index: u64, up_to_term: u64 },
}

impl FileLogStore {
    pub fn open(path: &Path) -> Result<Self, LogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let mut entries = VecDeque::new();
        let mut last_included_index = 0;
        let mut last_included_term = 0;

        let reader = BufReader::new(file.try_clone()?);
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: Record = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(_) => break,
            };
            match record {
                Record::Entry(entry) => {
                    entries.retain(|e: &LogEntry| e.index < entry.index);
                    entries.push_back(entry);
                }
                Record::Compact { up_to_index, up_to_term } => {
                    entries.retain(|e| e.index > up_to_index);
                    last_included_index = up_to_index;
                    last_included_term = up_to_term;
                }
            }
        }

        Ok(Self {
            file,
            path: path.to_owned(),
            entries,
            last_included_index,
            last_included_term,
        })
    }

    fn append_record(&mut self, record: &Record) -> Result<(), LogError> {
        let mut bytes = serde_json::to_vec(record)?;
        bytes.push(b'\n');
        self.file.write_all(&bytes)?;
        self.file.sync_all()?;
        Ok(())
    }

    fn index_of(&self, index: u64) -> Option<usize> {
        let front = self.entries.front()?.index;
        if index < front {
            return None;
        }
        let offset = (index - front) as usize;
        if offset < self.entries.len() {
            Some(offset)
        } else {
            None
        }
    }
}

impl LogStore for FileLogStore {
    fn first_index(&self) -> u64 {
        self.entries.front().map(|e| e.index).unwrap_or(self.last_included_index + 1)
    }

    fn last_index(&self) -> u64 {
        self.entries.back().map(|e| e.index).unwrap_or(self.last_included_index)
    }

    fn term_at(&self, index: u64) -> Option<u64> {
        if index == self.last_included_index {
            return Some(self.last_included_term);
        }
        self.index_of(index).map(|i| self.entries[i].term)
    }

    fn get(&self, index: u64) -> Option<LogEntry> {
        self.index_of(index).map(|i| self.entries[i].clone())
    }

    fn append(&mut self, entries: &[LogEntry]) -> Result<(), LogError> {
        for entry in entries {
            self.append_record(&Record::Entry(entry.clone()))?;
            self.entries.push_back(entry.clone());
        }
        Ok(())
    }

    fn delete_from(&mut self, from: u64) -> Result<(), LogError> {
        // Rewrite the file without the truncated suffix: a log truncation
        // must itself be durable, so a crash mid-rewrite cannot resurrect
        // the discarded entries.
        self.entries.retain(|e| e.index < from);

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(
                serde_json::to_vec(&Record::Compact {
                    up_to_index: self.last_included_index,
                    up_to_term: self.last_included_term,
                })?
                .as_slice(),
            )?;
            tmp.write_all(b"\n")?;
            for entry in &self.entries {
                tmp.write_all(serde_json::to_vec(&Record::Entry(entry.clone()))?.as_slice())?;
                tmp.write_all(b"\n")?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().create(true).read(true).append(true).open(&self.path)?;
        Ok(())
    }

    fn compact_up_to(&mut self, up_to_index: u64, up_to_term: u64) -> Result<(), LogError> {
        self.append_record(&Record::Compact { up_to_index, up_to_term })?;
        self.entries.retain(|e| e.index > up_to_index);
        self.last_included_index = up_to_index;
        self.last_included_term = up_to_term;
        Ok(())
    }

    fn last_included_index(&self) -> u64 {
        self.last_included_index
    }

    fn last_included_term(&self) -> u64 {
        self.last_included_term
    }
}

/// In-memory log store for tests.
#[derive(Default)]
pub struct MemLogStore {
    entries: VecDeque<LogEntry>,
    last_included_index: u64,
    last_included_term: u64,
}

impl MemLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(&self, index: u64) -> Option<usize> {
        let front = self.entries.front()?.index;
        if index < front {
            return None;
        }
        let offset = (index - front) as usize;
        (offset < self.entries.len()).then_some(offset)
    }
}

impl LogStore for MemLogStore {
    fn first_index(&self) -> u64 {
        self.entries.front().map(|e| e.index).unwrap_or(self.last_included_index + 1)
    }

    fn last_index(&self) -> u64 {
        self.entries.back().map(|e| e.index).unwrap_or(self.last_included_index)
    }

    fn term_at(&self, index: u64) -> Option<u64> {
        if index == self.last_included_index {
            return Some(self.last_included_term);
        }
        self.index_of(index).map(|i| self.entries[i].term)
    }

    fn get(&self, index: u64) -> Option<LogEntry> {
        self.index_of(index).map(|i| self.entries[i].clone())
    }

    fn append(&mut self, entries: &[LogEntry]) -> Result<(), LogError> {
        for entry in entries {
            self.entries.push_back(entry.clone());
        }
        Ok(())
    }

    fn delete_from(&mut self, from: u64) -> Result<(), LogError> {
        self.entries.retain(|e| e.index < from);
        Ok(())
    }

    fn compact_up_to(&mut self, up_to_index: u64, up_to_term: u64) -> Result<(), LogError> {
        self.entries.retain(|e| e.index > up_to_index);
        self.last_included_index = up_to_index;
        self.last_included_term = up_to_term;
        Ok(())
    }

    fn last_included_index(&self) -> u64 {
        self.last_included_index
    }

    fn last_included_term(&self) -> u64 {
        self.last_included_term
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
