use std::collections::BTreeMap;
use std::sync::Arc;

use chsync::destination::Destination;
use chsync::error::{ErrorKind, SyncResult};
use chsync::sync_error;
use chsync::types::{DestinationRow, PrimaryKey, ReplicaAlias};
use chsync_config::shared::{ClickHouseConnectionConfig, SyncServiceConfig};
use futures::future::join_all;
use tracing::info;

use crate::clickhouse::client::ClickHouseClient;
use crate::clickhouse::metrics::register_metrics;

/// ClickHouse destination spanning every configured node.
///
/// Rows are sent as `INSERT INTO <table> FORMAT JSONEachRow` through [`clickhouse::Client`],
/// one statement per replica and batch. Tables are expected to exist with a merge engine matching their sync target;
/// this destination never issues DDL.
#[derive(Debug, Clone)]
pub struct ClickHouseDestination {
    clients: Arc<BTreeMap<ReplicaAlias, ClickHouseClient>>,
}

impl ClickHouseDestination {
    /// Creates a client per entry of `databases`, keyed by alias.
    pub fn new(databases: &BTreeMap<String, ClickHouseConnectionConfig>) -> SyncResult<Self> {
        register_metrics();

        let clients = databases
            .iter()
            .map(|(alias, config)| {
                Ok((
                    ReplicaAlias::new(alias.as_str()),
                    ClickHouseClient::new(alias, config)?,
                ))
            })
            .collect::<SyncResult<BTreeMap<_, _>>>()?;

        Ok(Self {
            clients: Arc::new(clients),
        })
    }

    pub fn from_config(config: &SyncServiceConfig) -> SyncResult<Self> {
        Self::new(&config.databases)
    }

    pub fn replicas(&self) -> impl Iterator<Item = &ReplicaAlias> {
        self.clients.keys()
    }

    pub fn client(&self, replica: &ReplicaAlias) -> SyncResult<&ClickHouseClient> {
        self.clients.get(replica).ok_or_else(|| {
            sync_error!(
                ErrorKind::UnknownReplica,
                "Replica is not configured",
                format!("no ClickHouse database is configured under `{replica}`")
            )
        })
    }

    /// Checks that every node answers.
    pub async fn ping_all(&self) -> SyncResult<()> {
        let pings = self.clients.values().map(|client| client.ping());

        let errors: Vec<_> = join_all(pings)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();
        if !errors.is_empty() {
            return Err(errors.into());
        }

        info!(replicas = self.clients.len(), "all clickhouse replicas reachable");

        Ok(())
    }
}

impl Destination for ClickHouseDestination {
    fn name() -> &'static str {
        "clickhouse"
    }

    async fn insert_batch(
        &self,
        targets: &[ReplicaAlias],
        table: &str,
        rows: &[DestinationRow],
    ) -> SyncResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        // Resolve every replica before sending anything, so an unknown alias writes nothing.
        let clients = targets
            .iter()
            .map(|replica| self.client(replica))
            .collect::<SyncResult<Vec<_>>>()?;

        let inserts = clients
            .into_iter()
            .map(|client| client.insert_rows(table, rows));

        let errors: Vec<_> = join_all(inserts)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();
        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(rows.len() as u64)
    }

    async fn fetch_current_rows(
        &self,
        replica: &ReplicaAlias,
        table: &str,
        key_column: &str,
        keys: &[PrimaryKey],
    ) -> SyncResult<Vec<DestinationRow>> {
        self.client(replica)?
            .select_current(table, key_column, keys)
            .await
    }
}
