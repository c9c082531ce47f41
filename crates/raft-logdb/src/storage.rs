//! # storage
//!
//! why: durable persistence of per-replica raft state using standard rust fs apis
//! relations: wrapped by LogDb, which uses the replica state cache to skip redundant writes
//! what: Storage trait, FileStorage implementation, InMemoryStorage for testing

use crate::config::LogDbConfig;
use crate::error::Result;
use raft_core::{LogEntry, PersistentState, ReplicaKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// trait for durable storage of raft state for many replicas
///
/// this abstraction allows the same log db to work with:
/// - real filesystem (native)
/// - in-memory (testing)
pub trait Storage {
    /// persist the marker that this replica has been bootstrapped
    fn save_bootstrap(&mut self, key: ReplicaKey) -> Result<()>;

    /// whether a bootstrap marker was persisted for this replica
    fn has_bootstrap(&self, key: ReplicaKey) -> Result<bool>;

    /// persist the current term and vote
    fn save_state(&mut self, key: ReplicaKey, state: &PersistentState) -> Result<()>;

    /// load the persisted term and vote
    fn load_state(&self, key: ReplicaKey) -> Result<Option<PersistentState>>;

    /// append entries to the log
    ///
    /// entries at or below the current tail replace the conflicting suffix
    fn append_entries(&mut self, key: ReplicaKey, entries: &[LogEntry]) -> Result<()>;

    /// load all log entries (for crash recovery)
    fn load_entries(&self, key: ReplicaKey) -> Result<Vec<LogEntry>>;

    /// highest index in the persisted log
    fn max_index(&self, key: ReplicaKey) -> Result<Option<u64>> {
        Ok(self.load_entries(key)?.last().map(|e| e.index))
    }

    /// persist the index covered by the latest snapshot
    fn save_snapshot_index(&mut self, key: ReplicaKey, index: u64) -> Result<()>;

    /// load the index covered by the latest snapshot
    fn load_snapshot_index(&self, key: ReplicaKey) -> Result<Option<u64>>;
}

/// append `entries` to `log`, dropping any stored suffix they overwrite
fn merge_entries(log: &mut Vec<LogEntry>, entries: &[LogEntry]) {
    if let Some(first) = entries.first() {
        log.retain(|e| e.index < first.index);
        log.extend_from_slice(entries);
    }
}

// -- file storage implementation --

/// file-based storage implementation using std::fs
///
/// every replica gets its own directory `{group}-{replica}` with:
/// - bootstrap.json: bootstrap marker
/// - meta.json: term and vote
/// - log.json: array of log entries
/// - snapshot.json: latest snapshot index
pub struct FileStorage {
    /// root directory holding one sub directory per replica
    dir: PathBuf,
    sync_writes: bool,
}

impl FileStorage {
    /// create a new filestorage at the given directory
    /// creates the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(dir, &LogDbConfig::default())
    }

    pub fn with_config(dir: impl Into<PathBuf>, config: &LogDbConfig) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            sync_writes: config.sync_writes,
        })
    }

    fn replica_dir(&self, key: ReplicaKey) -> PathBuf {
        self.dir.join(format!("{}-{}", key.group_id, key.replica_id))
    }

    fn path(&self, key: ReplicaKey, file: &str) -> PathBuf {
        self.replica_dir(key).join(file)
    }

    /// atomic write: write to temp file then rename
    fn write_json<T: Serialize + ?Sized>(&self, key: ReplicaKey, file: &str, value: &T) -> Result<()> {
        let dir = self.replica_dir(key);
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_vec_pretty(value)?;
        let temp_path = dir.join(format!("{file}.tmp"));
        let mut out = File::create(&temp_path)?;
        out.write_all(&json)?;
        if self.sync_writes {
            out.sync_all()?;
        }
        fs::rename(&temp_path, dir.join(file))?;

        Ok(())
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let contents = match fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&contents)?))
    }
}

impl Storage for FileStorage {
    fn save_bootstrap(&mut self, key: ReplicaKey) -> Result<()> {
        self.write_json(key, "bootstrap.json", &key)
    }

    fn has_bootstrap(&self, key: ReplicaKey) -> Result<bool> {
        Ok(self.path(key, "bootstrap.json").exists())
    }

    fn save_state(&mut self, key: ReplicaKey, state: &PersistentState) -> Result<()> {
        self.write_json(key, "meta.json", state)
    }

    fn load_state(&self, key: ReplicaKey) -> Result<Option<PersistentState>> {
        Self::read_json(&self.path(key, "meta.json"))
    }

    fn append_entries(&mut self, key: ReplicaKey, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        // write entire log (simple approach - could optimize with append-only file)
        let mut log = self.load_entries(key)?;
        merge_entries(&mut log, entries);
        self.write_json(key, "log.json", &log)
    }

    fn load_entries(&self, key: ReplicaKey) -> Result<Vec<LogEntry>> {
        Ok(Self::read_json(&self.path(key, "log.json"))?.unwrap_or_default())
    }

    fn save_snapshot_index(&mut self, key: ReplicaKey, index: u64) -> Result<()> {
        self.write_json(key, "snapshot.json", &index)
    }

    fn load_snapshot_index(&self, key: ReplicaKey) -> Result<Option<u64>> {
        Self::read_json(&self.path(key, "snapshot.json"))
    }
}

// -- in-memory storage implementation --

#[derive(Debug, Default, Clone)]
struct ReplicaRecord {
    bootstrapped: bool,
    state: Option<PersistentState>,
    log: Vec<LogEntry>,
    snapshot_index: Option<u64>,
}

/// in-memory storage for testing
///
/// stores all state in memory, no persistence across restarts.
/// counts every write so callers can check which writes were skipped.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    replicas: HashMap<ReplicaKey, ReplicaRecord>,
    writes: u64,
}

impl InMemoryStorage {
    /// create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// number of write operations performed so far
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    fn record_mut(&mut self, key: ReplicaKey) -> &mut ReplicaRecord {
        self.writes += 1;
        self.replicas.entry(key).or_default()
    }
}

impl Storage for InMemoryStorage {
    fn save_bootstrap(&mut self, key: ReplicaKey) -> Result<()> {
        self.record_mut(key).bootstrapped = true;
        Ok(())
    }

    fn has_bootstrap(&self, key: ReplicaKey) -> Result<bool> {
        Ok(self.replicas.get(&key).is_some_and(|r| r.bootstrapped))
    }

    fn save_state(&mut self, key: ReplicaKey, state: &PersistentState) -> Result<()> {
        self.record_mut(key).state = Some(*state);
        Ok(())
    }

    fn load_state(&self, key: ReplicaKey) -> Result<Option<PersistentState>> {
        Ok(self.replicas.get(&key).and_then(|r| r.state))
    }

    fn append_entries(&mut self, key: ReplicaKey, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        merge_entries(&mut self.record_mut(key).log, entries);
        Ok(())
    }

    fn load_entries(&self, key: ReplicaKey) -> Result<Vec<LogEntry>> {
        Ok(self
            .replicas
            .get(&key)
            .map(|r| r.log.clone())
            .unwrap_or_default())
    }

    fn max_index(&self, key: ReplicaKey) -> Result<Option<u64>> {
        Ok(self
            .replicas
            .get(&key)
            .and_then(|r| r.log.last())
            .map(|e| e.index))
    }

    fn save_snapshot_index(&mut self, key: ReplicaKey, index: u64) -> Result<()> {
        self.record_mut(key).snapshot_index = Some(index);
        Ok(())
    }

    fn load_snapshot_index(&self, key: ReplicaKey) -> Result<Option<u64>> {
        Ok(self.replicas.get(&key).and_then(|r| r.snapshot_index))
    }
}
