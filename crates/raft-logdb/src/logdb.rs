//! # logdb
//!
//! why: avoid write amplification when many raft replicas share one log store
//! relations: combines the replica state cache with a Storage backend
//! what: LogDb, ReplicaUpdate, WriteSummary

use crate::cache::ReplicaStateCache;
use crate::config::LogDbConfig;
use crate::error::Result;
use crate::storage::Storage;
use parking_lot::Mutex;
use raft_core::{EntryBatch, LogEntry, PersistentState, ReplicaKey};
use std::collections::HashSet;

/// Everything one replica wants made durable in a single round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaUpdate {
    pub group_id: u64,
    pub replica_id: u64,
    /// voting state, written only if it changed since the last write
    pub state: Option<PersistentState>,
    /// new log entries, in index order
    pub entries: EntryBatch,
    /// index covered by a freshly taken snapshot
    pub snapshot_index: Option<u64>,
}

impl ReplicaUpdate {
    pub fn new(group_id: u64, replica_id: u64) -> Self {
        Self {
            group_id,
            replica_id,
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: PersistentState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_entries(mut self, entries: Vec<LogEntry>) -> Self {
        self.entries = EntryBatch::new(entries);
        self
    }

    pub fn with_snapshot(mut self, index: u64) -> Self {
        self.snapshot_index = Some(index);
        self
    }

    fn key(&self) -> ReplicaKey {
        ReplicaKey::new(self.group_id, self.replica_id)
    }
}

/// Counts of the writes a `save_raft_state` call performed and skipped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub states_written: usize,
    pub states_skipped: usize,
    pub entries_written: usize,
    pub snapshots_written: usize,
    pub snapshots_skipped: usize,
}

/// A log store that consults a [`ReplicaStateCache`] before touching storage
///
/// `LogDb` is `Sync` when its storage is `Send`, so one instance can be
/// shared by every replica worker. Snapshot saves for a given replica must
/// not overlap; see [`LogDb::save_snapshot`].
pub struct LogDb<S> {
    storage: Mutex<S>,
    cache: ReplicaStateCache,
    /// replicas whose cache entries were seeded from storage, only touched
    /// while the storage lock is held
    seeded: Mutex<HashSet<ReplicaKey>>,
    config: LogDbConfig,
}

impl<S: Storage> LogDb<S> {
    pub fn open(storage: S, config: LogDbConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage: Mutex::new(storage),
            cache: ReplicaStateCache::with_batch_capacity(config.batch_capacity),
            seeded: Mutex::new(HashSet::new()),
            config,
        })
    }

    pub fn config(&self) -> &LogDbConfig {
        &self.config
    }

    pub fn cache(&self) -> &ReplicaStateCache {
        &self.cache
    }

    /// run `f` against the underlying storage
    pub fn with_storage<T>(&self, f: impl FnOnce(&mut S) -> T) -> T {
        f(&mut self.storage.lock())
    }

    /// prepare a replica the first time this process sees it
    ///
    /// Returns true when this call seeded the replica: the bootstrap marker
    /// is written if missing and the snapshot baseline, max index and voting
    /// state are loaded from durable state. Concurrent callers wait on the
    /// storage lock and return false once seeding is done. If seeding fails
    /// the error is returned and the next call seeds again.
    pub fn bootstrap_replica(&self, group_id: u64, replica_id: u64) -> Result<bool> {
        let key = ReplicaKey::new(group_id, replica_id);
        let mut storage = self.storage.lock();
        let first = self.cache.register_replica(group_id, replica_id);
        if !first && self.seeded.lock().contains(&key) {
            return Ok(false);
        }

        if !storage.has_bootstrap(key)? {
            storage.save_bootstrap(key)?;
        }
        if let Some(index) = storage.load_snapshot_index(key)? {
            self.cache.record_snapshot_index(group_id, replica_id, index);
        }
        if let Some(index) = storage.max_index(key)? {
            self.cache.record_max_index(group_id, replica_id, index);
        }
        if let Some(state) = storage.load_state(key)? {
            self.cache.record_persistent_state(group_id, replica_id, state);
        }
        self.seeded.lock().insert(key);

        if first {
            tracing::debug!(replica = %key, "replica bootstrapped");
        } else {
            tracing::debug!(replica = %key, "replica bootstrap retried");
        }
        Ok(true)
    }

    /// persist a round of updates, skipping writes the cache proves redundant
    ///
    /// The first failing write aborts the round. Whatever the cache recorded
    /// for that write is rolled back, so retrying the same update writes again.
    pub fn save_raft_state(&self, updates: &[ReplicaUpdate]) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();

        for update in updates {
            let key = update.key();

            if let Some(state) = update.state {
                if self.save_state(key, state)? {
                    summary.states_written += 1;
                } else {
                    tracing::debug!(replica = %key, term = state.term, "state unchanged, write skipped");
                    summary.states_skipped += 1;
                }
            }

            if let Some(last) = update.entries.last_index() {
                self.storage.lock().append_entries(key, &update.entries.entries)?;
                self.cache
                    .record_max_index(update.group_id, update.replica_id, last);
                self.cache
                    .cache_last_entry_batch(update.group_id, update.replica_id, &update.entries);
                summary.entries_written += update.entries.len();
            }

            if let Some(index) = update.snapshot_index {
                if self.save_snapshot(update.group_id, update.replica_id, index)? {
                    summary.snapshots_written += 1;
                } else {
                    summary.snapshots_skipped += 1;
                }
            }
        }

        Ok(summary)
    }

    /// write `state` unless the cache already holds it
    ///
    /// On a failed write the cache is reset to whatever storage holds, or to
    /// the empty state when that cannot be read, so the state is not reported
    /// unchanged next time.
    fn save_state(&self, key: ReplicaKey, state: PersistentState) -> Result<bool> {
        let mut storage = self.storage.lock();
        if !self
            .cache
            .record_persistent_state(key.group_id, key.replica_id, state)
        {
            return Ok(false);
        }

        if let Err(e) = storage.save_state(key, &state) {
            let durable = storage.load_state(key).ok().flatten().unwrap_or_default();
            self.cache
                .record_persistent_state(key.group_id, key.replica_id, durable);
            tracing::warn!(replica = %key, term = state.term, error = %e, "state save failed");
            return Err(e);
        }
        Ok(true)
    }

    /// persist a snapshot index if it is newer than the committed baseline
    ///
    /// Returns `Ok(false)` without any write when the index is not eligible.
    /// A replica without a baseline is seeded from storage first (0 when no
    /// snapshot was ever saved), so the eligibility check never moves the
    /// baseline and it is committed only after the durable write succeeds.
    /// Index 0 is therefore never eligible. The caller must not run two
    /// snapshot saves for the same replica at once: both could pass the
    /// eligibility check before either commits.
    pub fn save_snapshot(&self, group_id: u64, replica_id: u64, index: u64) -> Result<bool> {
        let key = ReplicaKey::new(group_id, replica_id);
        if self.cache.snapshot_index(group_id, replica_id).is_none() {
            let durable = self.storage.lock().load_snapshot_index(key)?.unwrap_or(0);
            self.cache.record_snapshot_index(group_id, replica_id, durable);
        }

        if !self.cache.try_save_snapshot(group_id, replica_id, index) {
            tracing::debug!(replica = %key, index, "snapshot not newer than baseline, skipped");
            return Ok(false);
        }

        if let Err(e) = self.storage.lock().save_snapshot_index(key, index) {
            tracing::warn!(replica = %key, index, error = %e, "snapshot save failed");
            return Err(e);
        }
        self.cache.record_snapshot_index(group_id, replica_id, index);
        Ok(true)
    }

    /// highest log index written for the replica
    ///
    /// answered from the cache when possible, otherwise read from storage
    /// and remembered
    pub fn max_index(&self, group_id: u64, replica_id: u64) -> Result<Option<u64>> {
        if let Some(index) = self.cache.max_index(group_id, replica_id) {
            return Ok(Some(index));
        }

        let key = ReplicaKey::new(group_id, replica_id);
        let index = self.storage.lock().max_index(key)?;
        if let Some(index) = index {
            self.cache.record_max_index(group_id, replica_id, index);
        }
        Ok(index)
    }

    /// copy the replica's most recently written entries into `dest`
    ///
    /// `dest` is cleared and appended to, so its allocation is reused. When
    /// the cache has no batch for the replica, the tail of the persisted log,
    /// at most `batch_capacity` entries, stands in for it and is cached.
    /// Returns false, leaving `dest` untouched, when nothing has been written
    /// for the replica.
    pub fn last_entry_batch(
        &self,
        group_id: u64,
        replica_id: u64,
        dest: &mut EntryBatch,
    ) -> Result<bool> {
        if self.cache.fetch_last_entry_batch(group_id, replica_id, dest) {
            return Ok(true);
        }

        let key = ReplicaKey::new(group_id, replica_id);
        let mut entries = self.storage.lock().load_entries(key)?;
        if entries.is_empty() {
            return Ok(false);
        }
        let tail = entries.len().saturating_sub(self.config.batch_capacity);
        let batch = EntryBatch::new(entries.split_off(tail));
        self.cache.cache_last_entry_batch(group_id, replica_id, &batch);

        dest.clear();
        dest.entries.extend(batch.entries);
        Ok(true)
    }

    /// the persisted voting state of the replica
    pub fn read_state(&self, group_id: u64, replica_id: u64) -> Result<Option<PersistentState>> {
        self.storage
            .lock()
            .load_state(ReplicaKey::new(group_id, replica_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn open() -> LogDb<InMemoryStorage> {
        LogDb::open(InMemoryStorage::new(), LogDbConfig::default()).unwrap()
    }

    #[test]
    fn unchanged_state_is_not_rewritten() {
        let db = open();
        let update = ReplicaUpdate::new(1, 1).with_state(PersistentState::new(5, 1));

        let first = db.save_raft_state(&[update.clone()]).unwrap();
        let second = db.save_raft_state(&[update]).unwrap();

        assert_eq!(first.states_written, 1);
        assert_eq!(second.states_written, 0);
        assert_eq!(second.states_skipped, 1);
        assert_eq!(db.with_storage(|s| s.write_count()), 1);
    }

    #[test]
    fn stale_snapshot_does_no_io() {
        let db = open();
        assert!(db.save_snapshot(1, 1, 10).unwrap());
        let writes = db.with_storage(|s| s.write_count());

        assert!(!db.save_snapshot(1, 1, 10).unwrap());
        assert!(!db.save_snapshot(1, 1, 3).unwrap());
        assert_eq!(db.with_storage(|s| s.write_count()), writes);
    }

    #[test]
    fn snapshot_zero_is_never_eligible() {
        let db = open();
        assert!(!db.save_snapshot(1, 1, 0).unwrap());
        assert!(db.save_snapshot(1, 1, 1).unwrap());
    }

    #[test]
    fn snapshot_baseline_is_seeded_from_storage() {
        let db = open();
        db.with_storage(|s| s.save_snapshot_index(ReplicaKey::new(1, 1), 50).unwrap());

        assert!(!db.save_snapshot(1, 1, 40).unwrap());
        assert_eq!(db.cache().snapshot_index(1, 1), Some(50));
        assert!(db.save_snapshot(1, 1, 51).unwrap());
    }

    #[test]
    fn open_rejects_invalid_config() {
        let config = LogDbConfig {
            batch_capacity: 0,
            ..LogDbConfig::default()
        };
        assert!(LogDb::open(InMemoryStorage::new(), config).is_err());
    }
}
