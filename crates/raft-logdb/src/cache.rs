//! # cache
//!
//! why: let the log store skip durable writes when a replica's state has not changed
//! relations: owned by LogDb, consulted before every storage write and read-back
//! what: ReplicaStateCache, per-replica registration, voting state, max index,
//!       snapshot baseline and last entry batch behind one lock
//!
//! Snapshot saves are a two call protocol: `try_save_snapshot` checks
//! eligibility, the caller performs the durable save, then
//! `record_snapshot_index` commits the new baseline. The two calls are not
//! atomic with respect to each other, so callers must keep at most one
//! snapshot attempt in flight per replica.
//!
//! Entries are never removed from any map.

use parking_lot::Mutex;
use raft_core::{EntryBatch, PersistentState, ReplicaKey};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct CacheMaps {
    registered: HashSet<ReplicaKey>,
    persistent_state: HashMap<ReplicaKey, PersistentState>,
    last_entry_batch: HashMap<ReplicaKey, EntryBatch>,
    max_index: HashMap<ReplicaKey, u64>,
    snapshot_index: HashMap<ReplicaKey, u64>,
}

/// thread-safe change-detection state for every replica hosted by a log store
#[derive(Debug, Default)]
pub struct ReplicaStateCache {
    maps: Mutex<CacheMaps>,
    batch_capacity: usize,
}

impl ReplicaStateCache {
    /// create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// create an empty cache whose per-replica batch buffers start with room
    /// for at least `batch_capacity` entries
    pub fn with_batch_capacity(batch_capacity: usize) -> Self {
        Self {
            maps: Mutex::new(CacheMaps::default()),
            batch_capacity,
        }
    }

    /// mark the replica as seen; true only on the first call for this key
    pub fn register_replica(&self, group_id: u64, replica_id: u64) -> bool {
        let key = ReplicaKey::new(group_id, replica_id);
        let first = self.maps.lock().registered.insert(key);
        if first {
            tracing::trace!(replica = %key, "replica registered");
        }
        first
    }

    /// store `state` if it differs from the cached value
    ///
    /// returns true when the caller has to write the state durably
    pub fn record_persistent_state(
        &self,
        group_id: u64,
        replica_id: u64,
        state: PersistentState,
    ) -> bool {
        let key = ReplicaKey::new(group_id, replica_id);
        let mut maps = self.maps.lock();
        if maps.persistent_state.get(&key) == Some(&state) {
            return false;
        }
        maps.persistent_state.insert(key, state);
        true
    }

    /// overwrite the recorded max log index, no ordering is enforced
    pub fn record_max_index(&self, group_id: u64, replica_id: u64, index: u64) {
        let key = ReplicaKey::new(group_id, replica_id);
        self.maps.lock().max_index.insert(key, index);
    }

    /// the last recorded max log index, `None` if nothing was recorded yet
    pub fn max_index(&self, group_id: u64, replica_id: u64) -> Option<u64> {
        let key = ReplicaKey::new(group_id, replica_id);
        self.maps.lock().max_index.get(&key).copied()
    }

    /// check whether a snapshot at `index` may be saved
    ///
    /// The first call for a replica stores `index` as its baseline and is
    /// always eligible. Afterwards only an index strictly above the baseline
    /// is eligible, and the baseline is left as is until
    /// [`record_snapshot_index`](Self::record_snapshot_index) commits it.
    pub fn try_save_snapshot(&self, group_id: u64, replica_id: u64, index: u64) -> bool {
        let key = ReplicaKey::new(group_id, replica_id);
        let mut maps = self.maps.lock();
        if let Some(baseline) = maps.snapshot_index.get(&key) {
            return index > *baseline;
        }
        maps.snapshot_index.insert(key, index);
        tracing::trace!(replica = %key, index, "initial snapshot baseline");
        true
    }

    /// the snapshot baseline, `None` if no baseline exists yet
    pub fn snapshot_index(&self, group_id: u64, replica_id: u64) -> Option<u64> {
        let key = ReplicaKey::new(group_id, replica_id);
        self.maps.lock().snapshot_index.get(&key).copied()
    }

    /// overwrite the snapshot baseline, either after a successful save or
    /// when seeding it from recovered durable state
    pub fn record_snapshot_index(&self, group_id: u64, replica_id: u64, index: u64) {
        let key = ReplicaKey::new(group_id, replica_id);
        self.maps.lock().snapshot_index.insert(key, index);
        tracing::trace!(replica = %key, index, "snapshot baseline committed");
    }

    /// copy `batch` into the replica's cached batch
    ///
    /// The cached buffer is cleared and then appended to, so its allocation
    /// is reused across calls and only grows when a larger batch arrives.
    pub fn cache_last_entry_batch(&self, group_id: u64, replica_id: u64, batch: &EntryBatch) {
        let key = ReplicaKey::new(group_id, replica_id);
        let capacity = self.batch_capacity.max(batch.len());
        let mut maps = self.maps.lock();
        let cached = maps
            .last_entry_batch
            .entry(key)
            .or_insert_with(|| EntryBatch::with_capacity(capacity));
        cached.entries.clear();
        cached.entries.extend_from_slice(&batch.entries);
    }

    /// copy the cached batch into `dest`
    ///
    /// On a hit `dest` is cleared and the cached entries are appended to it,
    /// reusing its allocation, and true is returned. On a miss `dest` is not
    /// touched and false is returned.
    pub fn fetch_last_entry_batch(
        &self,
        group_id: u64,
        replica_id: u64,
        dest: &mut EntryBatch,
    ) -> bool {
        let key = ReplicaKey::new(group_id, replica_id);
        let maps = self.maps.lock();
        match maps.last_entry_batch.get(&key) {
            Some(cached) => {
                dest.entries.clear();
                dest.entries.extend_from_slice(&cached.entries);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_core::LogEntry;

    fn batch(indexes: &[u64]) -> EntryBatch {
        indexes
            .iter()
            .map(|&i| LogEntry::new(1, i, vec![i as u8]))
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn register_replica_is_true_only_once() {
        let cache = ReplicaStateCache::new();
        assert!(cache.register_replica(1, 1));
        assert!(!cache.register_replica(1, 1));
        assert!(!cache.register_replica(1, 1));
        assert!(cache.register_replica(1, 2));
    }

    #[test]
    fn persistent_state_reports_changes() {
        let cache = ReplicaStateCache::new();
        let s1 = PersistentState::new(5, 1);
        let s2 = PersistentState::new(5, 2);
        assert!(cache.record_persistent_state(1, 1, s1));
        assert!(!cache.record_persistent_state(1, 1, s1));
        assert!(cache.record_persistent_state(1, 1, s2));
        assert!(!cache.record_persistent_state(1, 1, s2));
        assert!(cache.record_persistent_state(1, 1, s1));
    }

    #[test]
    fn max_index_is_overwritten_unconditionally() {
        let cache = ReplicaStateCache::new();
        assert_eq!(cache.max_index(2, 1), None);
        cache.record_max_index(2, 1, 100);
        assert_eq!(cache.max_index(2, 1), Some(100));
        cache.record_max_index(2, 1, 40);
        assert_eq!(cache.max_index(2, 1), Some(40));
        assert_eq!(cache.max_index(2, 2), None);
    }

    #[test]
    fn first_snapshot_sets_baseline() {
        let cache = ReplicaStateCache::new();
        assert!(cache.try_save_snapshot(1, 1, 10));
        assert!(!cache.try_save_snapshot(1, 1, 10));
        assert!(!cache.try_save_snapshot(1, 1, 9));
        assert!(cache.try_save_snapshot(1, 1, 11));
    }

    #[test]
    fn snapshot_index_reports_baseline() {
        let cache = ReplicaStateCache::new();
        assert_eq!(cache.snapshot_index(1, 1), None);
        assert!(cache.try_save_snapshot(1, 1, 7));
        assert_eq!(cache.snapshot_index(1, 1), Some(7));
        assert!(cache.try_save_snapshot(1, 1, 9));
        assert_eq!(cache.snapshot_index(1, 1), Some(7));
        cache.record_snapshot_index(1, 1, 9);
        assert_eq!(cache.snapshot_index(1, 1), Some(9));
    }

    #[test]
    fn eligibility_check_does_not_move_baseline() {
        let cache = ReplicaStateCache::new();
        cache.record_snapshot_index(1, 1, 10);
        assert!(cache.try_save_snapshot(1, 1, 20));
        assert!(cache.try_save_snapshot(1, 1, 15));
        cache.record_snapshot_index(1, 1, 20);
        assert!(!cache.try_save_snapshot(1, 1, 15));
        assert!(!cache.try_save_snapshot(1, 1, 20));
        assert!(cache.try_save_snapshot(1, 1, 21));
    }

    #[test]
    fn fetch_replaces_destination_contents() {
        let cache = ReplicaStateCache::new();
        cache.cache_last_entry_batch(1, 1, &batch(&[1, 2, 3]));

        let mut dest = batch(&[90, 91, 92, 93, 94]);
        assert!(cache.fetch_last_entry_batch(1, 1, &mut dest));
        assert_eq!(dest, batch(&[1, 2, 3]));
    }

    #[test]
    fn fetch_miss_leaves_destination_alone() {
        let cache = ReplicaStateCache::new();
        let mut dest = batch(&[7, 8]);
        assert!(!cache.fetch_last_entry_batch(4, 4, &mut dest));
        assert_eq!(dest, batch(&[7, 8]));
    }

    #[test]
    fn cached_batch_reuses_its_buffer() {
        let cache = ReplicaStateCache::with_batch_capacity(8);
        cache.cache_last_entry_batch(1, 1, &batch(&[1, 2, 3, 4, 5, 6]));
        cache.cache_last_entry_batch(1, 1, &batch(&[7]));

        let maps = cache.maps.lock();
        let cached = &maps.last_entry_batch[&ReplicaKey::new(1, 1)];
        assert_eq!(cached.len(), 1);
        assert!(cached.capacity() >= 8);
    }

    #[test]
    fn maps_are_populated_independently() {
        let cache = ReplicaStateCache::new();
        cache.record_max_index(1, 1, 5);
        assert!(cache.register_replica(1, 1));
        assert!(cache.try_save_snapshot(1, 1, 1));
        let mut dest = EntryBatch::default();
        assert!(!cache.fetch_last_entry_batch(1, 1, &mut dest));
    }
}
