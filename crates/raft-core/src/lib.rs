//! # raft-core
//!
//! why: shared raft data types for a multi-group log store
//! relations: used by raft-logdb for caching and persistence
//! what: replica identity, persistent voting state, log entries and entry batches

pub mod log;
pub mod replica;
pub mod state;

pub use log::{EntryBatch, LogEntry};
pub use replica::ReplicaKey;
pub use state::PersistentState;
