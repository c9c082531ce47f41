//! # state
//!
//! why: the voting state raft must make durable before answering rpcs
//! relations: change-detected by the replica state cache, persisted by raft-logdb storage
//! what: PersistentState (term, vote)

use serde::{Deserialize, Serialize};

/// Durable voting state of a replica
///
/// Two states are equal when both term and vote match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersistentState {
    /// Latest term this replica has seen
    pub term: u64,
    /// Replica that received our vote in `term` (0 when no vote was cast)
    pub vote: u64,
}

impl PersistentState {
    pub fn new(term: u64, vote: u64) -> Self {
        Self { term, vote }
    }

    /// True for the state of a replica that has never voted nor seen a term
    pub fn is_empty(&self) -> bool {
        self.term == 0 && self.vote == 0
    }
}
