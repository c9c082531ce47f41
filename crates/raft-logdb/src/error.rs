//! # error
//!
//! why: one error type for everything that touches durable state
//! relations: returned by Storage implementations and LogDb
//! what: LogDbError, Result alias

use thiserror::Error;

/// errors raised by storage backends and the log db writer
#[derive(Debug, Error)]
pub enum LogDbError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode or decode stored state: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid log db config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LogDbError>;
