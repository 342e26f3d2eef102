use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::SyncResult;
use crate::source::Source;
use crate::types::{PrimaryKey, SourceRow};

type Table = BTreeMap<PrimaryKey, Map<String, Value>>;

/// In-memory source for tests and development.
///
/// Rows are addressed by primary key only, the key column passed to
/// [`Source::fetch_rows`] is not consulted.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: Arc<Mutex<HashMap<String, Table>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a row.
    pub async fn upsert_row(
        &self,
        table: &str,
        primary_key: impl Into<PrimaryKey>,
        values: Map<String, Value>,
    ) {
        let mut tables = self.tables.lock().await;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(primary_key.into(), values);
    }

    /// Removes a row. Returns `true` if it existed.
    pub async fn delete_row(&self, table: &str, primary_key: &PrimaryKey) -> bool {
        let mut tables = self.tables.lock().await;
        tables
            .get_mut(table)
            .is_some_and(|rows| rows.remove(primary_key).is_some())
    }
}

impl Source for MemorySource {
    async fn fetch_rows(
        &self,
        table: &str,
        _key_column: &str,
        keys: &[PrimaryKey],
    ) -> SyncResult<Vec<SourceRow>> {
        let tables = self.tables.lock().await;
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };

        Ok(keys
            .iter()
            .filter_map(|key| {
                rows.get(key)
                    .map(|values| SourceRow::new(key.clone(), values.clone()))
            })
            .collect())
    }
}
