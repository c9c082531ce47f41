//! # replica
//!
//! why: identify one replica among many raft groups hosted by a process
//! relations: the key for every per-replica map in raft-logdb
//! what: ReplicaKey (group id, replica id)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a single replica: the raft group it belongs to and its id within that group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaKey {
    pub group_id: u64,
    pub replica_id: u64,
}

impl ReplicaKey {
    pub fn new(group_id: u64, replica_id: u64) -> Self {
        Self {
            group_id,
            replica_id,
        }
    }
}

impl fmt::Display for ReplicaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}:r{}", self.group_id, self.replica_id)
    }
}

impl From<(u64, u64)> for ReplicaKey {
    fn from((group_id, replica_id): (u64, u64)) -> Self {
        Self::new(group_id, replica_id)
    }
}
