use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// How a write is spread over the candidate replicas of a table.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// One uniformly random candidate receives the batch; the destination replicates it.
    #[default]
    AnyOf,
    /// Every candidate receives the batch.
    All,
}

/// Replica selection rules of a single table.
///
/// Empty lists fall back to the service's default database.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RoutingConfig {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
    #[serde(default)]
    pub write_mode: WriteMode,
    /// Candidates for replicated DDL; one of them is picked per migration.
    #[serde(default)]
    pub migrate_replicated: Vec<String>,
    /// Nodes that all receive non replicated DDL.
    #[serde(default)]
    pub migrate_non_replicated: Vec<String>,
}

impl RoutingConfig {
    /// Returns every alias referenced by this routing, paired with its field name.
    pub fn aliases(&self) -> impl Iterator<Item = (&'static str, &str)> {
        let read = self.read.iter().map(|alias| ("read", alias.as_str()));
        let write = self.write.iter().map(|alias| ("write", alias.as_str()));
        let replicated = self
            .migrate_replicated
            .iter()
            .map(|alias| ("migrate_replicated", alias.as_str()));
        let non_replicated = self
            .migrate_non_replicated
            .iter()
            .map(|alias| ("migrate_non_replicated", alias.as_str()));

        read.chain(write).chain(replicated).chain(non_replicated)
    }
}

/// Per table overrides of [`SyncConfig`](crate::shared::SyncConfig) and routing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TableSyncConfig {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub lock_ttl_ms: Option<u64>,
    /// Disabled tables keep recording operations but are never planned for a round.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl TableSyncConfig {
    pub fn validate(&self, table: &str) -> Result<(), ValidationError> {
        if self.batch_size == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("tables.{table}.batch_size"),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.lock_ttl_ms == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("tables.{table}.lock_ttl_ms"),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for TableSyncConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            delay_ms: None,
            lock_ttl_ms: None,
            enabled: default_enabled(),
            routing: RoutingConfig::default(),
        }
    }
}

fn default_enabled() -> bool {
    true
}
