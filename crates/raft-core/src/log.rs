//! # log
//!
//! why: represent the entries a replica appends to its raft log
//! relations: written by raft-logdb storage, cached per replica by the state cache
//! what: LogEntry struct, EntryBatch buffer with index helpers

use serde::{Deserialize, Serialize};

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: u64,
    /// The index of this entry in the log (1-indexed)
    pub index: u64,
    /// The command to be applied to the state machine
    pub command: Vec<u8>,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(term: u64, index: u64, command: Vec<u8>) -> Self {
        Self { term, index, command }
    }
}

/// An ordered run of log entries belonging to one replica
///
/// The backing vector is meant to be reused: callers clear it and append
/// into it instead of building a new batch for every write or read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBatch {
    pub entries: Vec<LogEntry>,
}

impl EntryBatch {
    pub fn new(entries: Vec<LogEntry>) -> Self {
        Self { entries }
    }

    /// Create an empty batch able to hold `capacity` entries without growing
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Drop all entries, keeping the allocation
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn first_index(&self) -> Option<u64> {
        self.entries.first().map(|e| e.index)
    }

    pub fn last_index(&self) -> Option<u64> {
        self.entries.last().map(|e| e.index)
    }
}

impl From<Vec<LogEntry>> for EntryBatch {
    fn from(entries: Vec<LogEntry>) -> Self {
        Self::new(entries)
    }
}
