use std::sync::Arc;

use tokio::sync::Mutex;

use crate::destination::Destination;
use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::types::{DestinationRow, PrimaryKey, ReplicaAlias};

/// One `insert_batch` call as seen by the wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertCall {
    pub targets: Vec<ReplicaAlias>,
    pub table: String,
    pub rows: Vec<DestinationRow>,
}

#[derive(Debug, Clone)]
struct InsertFailure {
    table: Option<String>,
    kind: ErrorKind,
}

#[derive(Debug, Default)]
struct Inner {
    insert_calls: Vec<InsertCall>,
    failure: Option<InsertFailure>,
    fetch_calls: usize,
}

/// Destination wrapper recording every call and failing inserts on demand.
///
/// Failed inserts are recorded but never reach the wrapped destination.
#[derive(Debug, Clone)]
pub struct TestDestinationWrapper<D> {
    wrapped_destination: D,
    inner: Arc<Mutex<Inner>>,
}

impl<D> TestDestinationWrapper<D> {
    pub fn wrap(destination: D) -> Self {
        Self {
            wrapped_destination: destination,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn wrapped(&self) -> &D {
        &self.wrapped_destination
    }

    /// Makes every following insert fail with `kind`.
    pub async fn fail_inserts(&self, kind: ErrorKind) {
        self.inner.lock().await.failure = Some(InsertFailure { table: None, kind });
    }

    /// Makes following inserts into `table` fail with `kind`.
    pub async fn fail_inserts_into(&self, table: &str, kind: ErrorKind) {
        self.inner.lock().await.failure = Some(InsertFailure {
            table: Some(table.to_string()),
            kind,
        });
    }

    pub async fn succeed_inserts(&self) {
        self.inner.lock().await.failure = None;
    }

    pub async fn insert_calls(&self) -> Vec<InsertCall> {
        self.inner.lock().await.insert_calls.clone()
    }

    pub async fn fetch_calls(&self) -> usize {
        self.inner.lock().await.fetch_calls
    }
}

impl<D> Destination for TestDestinationWrapper<D>
where
    D: Destination + Send + Sync,
{
    fn name() -> &'static str {
        D::name()
    }

    async fn insert_batch(
        &self,
        targets: &[ReplicaAlias],
        table: &str,
        rows: &[DestinationRow],
    ) -> SyncResult<u64> {
        let failure = {
            let mut inner = self.inner.lock().await;
            inner.insert_calls.push(InsertCall {
                targets: targets.to_vec(),
                table: table.to_string(),
                rows: rows.to_vec(),
            });

            inner
                .failure
                .clone()
                .filter(|failure| failure.table.as_deref().is_none_or(|name| name == table))
        };

        if let Some(failure) = failure {
            return Err(sync_error!(
                failure.kind,
                "Injected destination failure",
                format!("insert of {} rows into `{table}` was configured to fail", rows.len())
            ));
        }

        self.wrapped_destination
            .insert_batch(targets, table, rows)
            .await
    }

    async fn fetch_current_rows(
        &self,
        replica: &ReplicaAlias,
        table: &str,
        key_column: &str,
        keys: &[PrimaryKey],
    ) -> SyncResult<Vec<DestinationRow>> {
        self.inner.lock().await.fetch_calls += 1;

        self.wrapped_destination
            .fetch_current_rows(replica, table, key_column, keys)
            .await
    }

    async fn shutdown(&self) -> SyncResult<()> {
        self.wrapped_destination.shutdown().await
    }
}
