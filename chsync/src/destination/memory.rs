use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::destination::Destination;
use crate::error::SyncResult;
use crate::types::{DestinationRow, PrimaryKey, ReplicaAlias};

/// One `insert_batch` call as received by a single replica.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRecord {
    pub replica: ReplicaAlias,
    pub table: String,
    pub rows: usize,
}

#[derive(Debug, Default)]
struct Inner {
    /// Rows in insert order, per replica and table.
    tables: HashMap<(ReplicaAlias, String), Vec<DestinationRow>>,
    inserts: Vec<InsertRecord>,
}

/// In-memory destination for tests and development.
///
/// Every replica keeps its own copy of the tables, so fan-out and replica choice are
/// observable. Rows are never merged; [`MemoryDestination::latest_rows`] emulates a read
/// with "latest version wins" semantics.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rows `replica` holds for `table`, in insert order.
    pub async fn rows(&self, replica: &ReplicaAlias, table: &str) -> Vec<DestinationRow> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(&(replica.clone(), table.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the rows of `table` over all replicas, in insert order per replica.
    pub async fn all_rows(&self, table: &str) -> Vec<DestinationRow> {
        let inner = self.inner.lock().await;
        let mut replicas: Vec<_> = inner
            .tables
            .iter()
            .filter(|((_, name), _)| name == table)
            .collect();
        replicas.sort_by(|((a, _), _), ((b, _), _)| a.cmp(b));

        replicas
            .into_iter()
            .flat_map(|(_, rows)| rows.iter().cloned())
            .collect()
    }

    /// Returns, per primary key, the row of `table` with the highest `version_column` over all
    /// replicas. Rows without a version rank by insert order.
    pub async fn latest_rows(
        &self,
        table: &str,
        key_column: &str,
        version_column: &str,
    ) -> BTreeMap<PrimaryKey, DestinationRow> {
        let mut latest: BTreeMap<PrimaryKey, DestinationRow> = BTreeMap::new();

        for row in self.all_rows(table).await {
            let Some(key) = row.primary_key(key_column) else {
                continue;
            };

            let newer = match latest.get(&key) {
                Some(current) => row.get_u64(version_column) >= current.get_u64(version_column),
                None => true,
            };
            if newer {
                latest.insert(key, row);
            }
        }

        latest
    }

    /// Returns every insert received so far, one record per replica.
    pub async fn inserts(&self) -> Vec<InsertRecord> {
        self.inner.lock().await.inserts.clone()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.tables.clear();
        inner.inserts.clear();
    }
}

impl Destination for MemoryDestination {
    fn name() -> &'static str {
        "memory"
    }

    async fn insert_batch(
        &self,
        targets: &[ReplicaAlias],
        table: &str,
        rows: &[DestinationRow],
    ) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;

        for replica in targets {
            info!(%replica, table, rows = rows.len(), "inserting batch");

            inner
                .tables
                .entry((replica.clone(), table.to_string()))
                .or_default()
                .extend(rows.iter().cloned());
            inner.inserts.push(InsertRecord {
                replica: replica.clone(),
                table: table.to_string(),
                rows: rows.len(),
            });
        }

        Ok(rows.len() as u64)
    }

    /// Returns the last inserted row per key, which is the merged state as long as rows of
    /// one key are inserted in version order.
    async fn fetch_current_rows(
        &self,
        replica: &ReplicaAlias,
        table: &str,
        key_column: &str,
        keys: &[PrimaryKey],
    ) -> SyncResult<Vec<DestinationRow>> {
        let inner = self.inner.lock().await;
        let Some(rows) = inner.tables.get(&(replica.clone(), table.to_string())) else {
            return Ok(Vec::new());
        };

        let mut current: HashMap<PrimaryKey, &DestinationRow> = HashMap::new();
        for row in rows {
            if let Some(key) = row.primary_key(key_column)
                && keys.contains(&key)
            {
                current.insert(key, row);
            }
        }

        Ok(keys
            .iter()
            .filter_map(|key| current.get(key).map(|row| (*row).clone()))
            .collect())
    }
}
