//! # config
//!
//! why: tune durability and buffer sizing of the log db
//! relations: consumed by LogDb::open and FileStorage
//! what: LogDbConfig with defaults, json loading, validation

use crate::error::{LogDbError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a log db instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogDbConfig {
    /// fsync every file written by FileStorage before it is renamed into place
    pub sync_writes: bool,
    /// initial capacity of each replica's cached entry batch
    pub batch_capacity: usize,
}

impl Default for LogDbConfig {
    fn default() -> Self {
        Self {
            sync_writes: true,
            batch_capacity: 64,
        }
    }
}

impl LogDbConfig {
    /// parse a config from json, missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_capacity == 0 {
            return Err(LogDbError::Config(
                "batch_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = LogDbConfig::default();
        assert!(config.sync_writes);
        assert_eq!(config.batch_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = LogDbConfig::from_json(r#"{ "sync_writes": false }"#).unwrap();
        assert!(!config.sync_writes);
        assert_eq!(config.batch_capacity, 64);
    }

    #[test]
    fn zero_batch_capacity_is_rejected() {
        let err = LogDbConfig::from_json(r#"{ "batch_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, LogDbError::Config(_)));
    }

    #[test]
    fn malformed_json_is_a_codec_error() {
        let err = LogDbConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, LogDbError::Codec(_)));
    }
}
