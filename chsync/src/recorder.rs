//! Capture side of the engine.
//!
//! The relational side calls the recorder once a transaction has committed. Mutations of
//! a transaction that rolls back must never reach the queue, so callers either record after
//! their own commit or buffer changes in a [`TransactionChanges`] and hand it over once the
//! commit succeeded. Dropping the buffer discards its changes.

use std::collections::BTreeMap;

use metrics::counter;
use tracing::debug;

use crate::error::SyncResult;
use crate::metrics::{CHSYNC_OPERATIONS_RECORDED_TOTAL, IMPORT_KEY_LABEL, OPERATION_KIND_LABEL};
use crate::store::queue::QueueStore;
use crate::types::{ImportKey, Mutation, OperationKind, PrimaryKey};

/// Hands captured mutations to the queue.
#[derive(Debug, Clone)]
pub struct ChangeRecorder<St> {
    store: St,
}

impl<St> ChangeRecorder<St>
where
    St: QueueStore + Sync,
{
    pub fn new(store: St) -> Self {
        Self { store }
    }

    /// Enqueues one mutation of `kind` per key and returns how many were queued.
    ///
    /// An error means nothing may be assumed captured; the caller decides whether its
    /// transaction counts as synchronized.
    pub async fn record<I, K>(
        &self,
        import_key: &ImportKey,
        kind: OperationKind,
        keys: I,
    ) -> SyncResult<u64>
    where
        I: IntoIterator<Item = K>,
        K: Into<PrimaryKey>,
    {
        let mutations: Vec<Mutation> = keys
            .into_iter()
            .map(|key| Mutation::new(key, kind))
            .collect();

        self.enqueue(import_key, mutations).await
    }

    /// Starts buffering the changes of a source transaction.
    pub fn begin(&self) -> TransactionChanges {
        TransactionChanges::default()
    }

    async fn enqueue(&self, import_key: &ImportKey, mutations: Vec<Mutation>) -> SyncResult<u64> {
        if mutations.is_empty() {
            return Ok(0);
        }

        let mut per_kind: BTreeMap<&'static str, u64> = BTreeMap::new();
        for mutation in &mutations {
            *per_kind.entry(mutation.kind.as_static_str()).or_default() += 1;
        }

        let queued = self.store.enqueue_many(import_key, mutations).await?;

        for (kind, count) in per_kind {
            counter!(
                CHSYNC_OPERATIONS_RECORDED_TOTAL,
                IMPORT_KEY_LABEL => import_key.to_string(),
                OPERATION_KIND_LABEL => kind,
            )
            .increment(count);
        }
        debug!(%import_key, queued, "recorded operations");

        Ok(queued)
    }
}

/// Changes of one source transaction, waiting for its commit.
#[derive(Debug, Default)]
pub struct TransactionChanges {
    changes: Vec<(ImportKey, Mutation)>,
}

impl TransactionChanges {
    pub fn record<I, K>(&mut self, import_key: &ImportKey, kind: OperationKind, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<PrimaryKey>,
    {
        self.changes.extend(
            keys.into_iter()
                .map(|key| (import_key.clone(), Mutation::new(key, kind))),
        );
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Enqueues the buffered changes. Call only after the source transaction committed.
    ///
    /// Changes are grouped per import key, keeping their capture order within a key.
    pub async fn commit_after<St>(self, recorder: &ChangeRecorder<St>) -> SyncResult<u64>
    where
        St: QueueStore + Sync,
    {
        let mut grouped: BTreeMap<ImportKey, Vec<Mutation>> = BTreeMap::new();
        for (import_key, mutation) in self.changes {
            grouped.entry(import_key).or_default().push(mutation);
        }

        let mut queued = 0;
        for (import_key, mutations) in grouped {
            queued += recorder.enqueue(&import_key, mutations).await?;
        }

        Ok(queued)
    }
}
