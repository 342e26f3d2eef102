use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::SyncResult;
use crate::store::lock::{LockAcquisition, LockStore, LockToken};
use crate::store::queue::QueueStore;
use crate::store::schedule::ScheduleStore;
use crate::store::version::VersionStore;
use crate::types::{Batch, ImportKey, Mutation, Operation, OperationId, RowVersion};

#[derive(Debug)]
struct HeldLock {
    token: LockToken,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    /// Pending operations per import key, ordered by id.
    queues: HashMap<ImportKey, BTreeMap<OperationId, Operation>>,
    last_operation_id: u64,
    /// Locks stay here until released, so an expired entry marks a hard release.
    locks: HashMap<ImportKey, HeldLock>,
    versions: HashMap<ImportKey, RowVersion>,
    last_sync_times: HashMap<ImportKey, DateTime<Utc>>,
}

/// In-process store for tests and single worker development setups.
///
/// Clones share the same state, which lets a test drop an engine and build a new one on
/// top of the same store to mimic a restart. Lock expiry follows the tokio clock, so paused
/// time in tests drives TTLs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ids of all pending operations of `import_key`, oldest first.
    pub async fn pending_operation_ids(&self, import_key: &ImportKey) -> Vec<OperationId> {
        let inner = self.inner.lock().await;

        inner
            .queues
            .get(import_key)
            .map(|queue| queue.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl QueueStore for MemoryStore {
    async fn enqueue_many(
        &self,
        import_key: &ImportKey,
        mutations: Vec<Mutation>,
    ) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;
        let count = mutations.len() as u64;

        for mutation in mutations {
            inner.last_operation_id += 1;
            let id = OperationId(inner.last_operation_id);

            let operation = Operation {
                id,
                import_key: import_key.clone(),
                primary_key: mutation.primary_key,
                kind: mutation.kind,
                enqueued_at: mutation.captured_at,
            };

            inner
                .queues
                .entry(import_key.clone())
                .or_default()
                .insert(id, operation);
        }

        Ok(count)
    }

    async fn peek_batch(&self, import_key: &ImportKey, max_size: usize) -> SyncResult<Batch> {
        let inner = self.inner.lock().await;

        let operations = inner
            .queues
            .get(import_key)
            .map(|queue| queue.values().take(max_size).cloned().collect())
            .unwrap_or_default();

        Ok(Batch::new(import_key.clone(), operations))
    }

    async fn commit(&self, import_key: &ImportKey, batch: &Batch) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;

        let Some(queue) = inner.queues.get_mut(import_key) else {
            return Ok(0);
        };

        let removed = batch
            .operations()
            .iter()
            .filter(|operation| queue.remove(&operation.id).is_some())
            .count();

        Ok(removed as u64)
    }

    async fn size(&self, import_key: &ImportKey) -> SyncResult<u64> {
        let inner = self.inner.lock().await;

        Ok(inner
            .queues
            .get(import_key)
            .map(|queue| queue.len() as u64)
            .unwrap_or(0))
    }

    async fn flush(&self, import_key: &ImportKey) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.locks.remove(import_key);
        inner.last_sync_times.remove(import_key);

        Ok(inner
            .queues
            .remove(import_key)
            .map(|queue| queue.len() as u64)
            .unwrap_or(0))
    }
}

impl LockStore for MemoryStore {
    async fn acquire_lock(
        &self,
        import_key: &ImportKey,
        ttl: Duration,
    ) -> SyncResult<LockAcquisition> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let hard_released = match inner.locks.get(import_key) {
            Some(held) if held.expires_at > now => return Ok(LockAcquisition::Busy),
            Some(_) => true,
            None => false,
        };

        let token = LockToken::generate();
        inner.locks.insert(
            import_key.clone(),
            HeldLock {
                token,
                expires_at: now + ttl,
            },
        );

        Ok(LockAcquisition::Acquired {
            token,
            hard_released,
        })
    }

    async fn release_lock(&self, import_key: &ImportKey, token: LockToken) -> SyncResult<bool> {
        let mut inner = self.inner.lock().await;

        match inner.locks.get(import_key) {
            Some(held) if held.token == token && held.expires_at > Instant::now() => {
                inner.locks.remove(import_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn renew_lock(
        &self,
        import_key: &ImportKey,
        token: LockToken,
        ttl: Duration,
    ) -> SyncResult<bool> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        match inner.locks.get_mut(import_key) {
            Some(held) if held.token == token && held.expires_at > now => {
                held.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl VersionStore for MemoryStore {
    async fn reserve_versions(
        &self,
        import_key: &ImportKey,
        count: u64,
    ) -> SyncResult<RangeInclusive<RowVersion>> {
        let mut inner = self.inner.lock().await;

        let current = inner.versions.entry(import_key.clone()).or_insert(0);
        let first = *current + 1;
        *current += count;

        Ok(first..=*current)
    }
}

impl ScheduleStore for MemoryStore {
    async fn last_sync_time(&self, import_key: &ImportKey) -> SyncResult<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().await;

        Ok(inner.last_sync_times.get(import_key).copied())
    }

    async fn set_last_sync_time(
        &self,
        import_key: &ImportKey,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.last_sync_times.insert(import_key.clone(), synced_at);

        Ok(())
    }
}
