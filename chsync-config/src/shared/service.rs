use std::collections::BTreeMap;

use serde::Deserialize;

use crate::Config;
use crate::shared::{
    ClickHouseConnectionConfig, StoreConfig, SyncConfig, TableSyncConfig, ValidationError,
};

/// Complete configuration of a sync worker process.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncServiceConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Destination nodes keyed by alias.
    pub databases: BTreeMap<String, ClickHouseConnectionConfig>,
    /// Alias used by tables without routing rules.
    #[serde(default = "default_database_alias")]
    pub default_database: String,
    /// Per table overrides keyed by import key.
    #[serde(default)]
    pub tables: BTreeMap<String, TableSyncConfig>,
}

impl SyncServiceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.sync.validate()?;
        self.store.validate()?;

        for (alias, database) in &self.databases {
            database.validate(alias)?;
        }

        if !self.databases.contains_key(&self.default_database) {
            return Err(ValidationError::UnknownDatabaseAlias {
                field: "default_database".to_string(),
                alias: self.default_database.clone(),
            });
        }

        for (table, table_config) in &self.tables {
            table_config.validate(table)?;

            for (field, alias) in table_config.routing.aliases() {
                if !self.databases.contains_key(alias) {
                    return Err(ValidationError::UnknownDatabaseAlias {
                        field: format!("tables.{table}.routing.{field}"),
                        alias: alias.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Returns the overrides of `table`, if any.
    pub fn table(&self, table: &str) -> Option<&TableSyncConfig> {
        self.tables.get(table)
    }
}

impl Config for SyncServiceConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

fn default_database_alias() -> String {
    "default".to_string()
}
