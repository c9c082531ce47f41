//! # raft-logdb
//!
//! why: a shared log store for many raft replicas that skips redundant durable writes
//! relations: built on raft-core types, backed by any Storage implementation
//! what: ReplicaStateCache, Storage trait with FileStorage and InMemoryStorage,
//!       LogDb writer, LogDbConfig, LogDbError

pub mod cache;
pub mod config;
pub mod error;
pub mod logdb;
pub mod storage;

pub use cache::ReplicaStateCache;
pub use config::LogDbConfig;
pub use error::{LogDbError, Result};
pub use logdb::{LogDb, ReplicaUpdate, WriteSummary};
pub use storage::{FileStorage, InMemoryStorage, Storage};
