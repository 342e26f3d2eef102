use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Connection settings of one ClickHouse node, addressed by its alias in
/// [`SyncServiceConfig::databases`](crate::shared::SyncServiceConfig).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClickHouseConnectionConfig {
    /// HTTP endpoint, e.g. `http://localhost:8123`.
    pub url: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default = "default_database")]
    pub database: String,
    /// Execution limit of each query in milliseconds, rounded up to whole seconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ClickHouseConnectionConfig {
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

    pub fn validate(&self, alias: &str) -> Result<(), ValidationError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("databases.{alias}.url"),
                constraint: "must be an http:// or https:// url".to_string(),
            });
        }

        Ok(())
    }
}

fn default_user() -> String {
    "default".to_string()
}

fn default_database() -> String {
    "default".to_string()
}

fn default_timeout_ms() -> u64 {
    ClickHouseConnectionConfig::DEFAULT_TIMEOUT_MS
}
