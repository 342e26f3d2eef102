use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError};

/// Backing store of the operation queue, the sync locks and the version counters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StoreConfig {
    /// Process local store. Nothing survives a restart.
    #[default]
    Memory,
    /// Tables in the `chsync` schema of a Postgres database.
    Postgres { connection: PgConnectionConfig },
    /// Redis keys under `key_prefix`.
    Redis(RedisConfig),
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            StoreConfig::Memory => Ok(()),
            StoreConfig::Postgres { connection } => connection.validate(),
            StoreConfig::Redis(config) => config.validate(),
        }
    }
}

/// Connection settings of the Redis store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedisConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl RedisConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pool_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "store.pool_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn default_redis_port() -> u16 {
    6379
}

fn default_pool_size() -> usize {
    4
}

fn default_key_prefix() -> String {
    "chsync".to_string()
}
