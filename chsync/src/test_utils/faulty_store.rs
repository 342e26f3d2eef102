use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{ErrorKind, SyncResult};
use crate::store::lock::{LockAcquisition, LockStore, LockToken};
use crate::store::queue::QueueStore;
use crate::store::schedule::ScheduleStore;
use crate::store::version::VersionStore;
use crate::sync_error;
use crate::types::{Batch, ImportKey, Mutation, RowVersion};

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Enqueue,
    PeekBatch,
    Commit,
    Size,
    Fail,
    AcquireLock,
    ReleaseLock,
    RenewLock,
    ReserveVersions,
    LastSyncTime,
}

/// How an operation misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// The call returns a [`ErrorKind::QueueUnavailable`] error without reaching the store.
    Unavailable,
    /// Lock calls report a lost lock: acquire is busy, renew and release return `false`.
    /// Other operations behave as with [`FaultType::Unavailable`].
    LockLost,
}

#[derive(Debug, Default)]
struct Inner {
    faults: HashMap<StoreOperation, FaultType>,
    calls: Vec<StoreOperation>,
}

/// Store wrapper injecting faults into chosen operations.
///
/// Clones share their faults, so a test can keep a handle while the engine owns another.
#[derive(Debug, Clone)]
pub struct FaultInjectingStore<St> {
    store: St,
    inner: Arc<Mutex<Inner>>,
}

impl<St> FaultInjectingStore<St> {
    pub fn wrap(store: St) -> Self {
        Self {
            store,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn inner(&self) -> &St {
        &self.store
    }

    pub async fn inject(&self, operation: StoreOperation, fault: FaultType) {
        self.inner.lock().await.faults.insert(operation, fault);
    }

    pub async fn clear(&self, operation: StoreOperation) {
        self.inner.lock().await.faults.remove(&operation);
    }

    pub async fn clear_all(&self) {
        self.inner.lock().await.faults.clear();
    }

    /// Returns how many times `operation` was called, faulty calls included.
    pub async fn calls(&self, operation: StoreOperation) -> usize {
        self.inner
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| **call == operation)
            .count()
    }

    async fn fault(&self, operation: StoreOperation) -> Option<FaultType> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(operation);
        inner.faults.get(&operation).copied()
    }

    async fn check(&self, operation: StoreOperation) -> SyncResult<()> {
        match self.fault(operation).await {
            Some(_) => Err(sync_error!(
                ErrorKind::QueueUnavailable,
                "Injected store fault",
                format!("{operation:?} was configured to fail")
            )),
            None => Ok(()),
        }
    }
}

impl<St> QueueStore for FaultInjectingStore<St>
where
    St: QueueStore + Send + Sync,
{
    async fn enqueue_many(
        &self,
        import_key: &ImportKey,
        mutations: Vec<Mutation>,
    ) -> SyncResult<u64> {
        self.check(StoreOperation::Enqueue).await?;
        self.store.enqueue_many(import_key, mutations).await
    }

    async fn peek_batch(&self, import_key: &ImportKey, max_size: usize) -> SyncResult<Batch> {
        self.check(StoreOperation::PeekBatch).await?;
        self.store.peek_batch(import_key, max_size).await
    }

    async fn commit(&self, import_key: &ImportKey, batch: &Batch) -> SyncResult<u64> {
        self.check(StoreOperation::Commit).await?;
        self.store.commit(import_key, batch).await
    }

    async fn size(&self, import_key: &ImportKey) -> SyncResult<u64> {
        self.check(StoreOperation::Size).await?;
        self.store.size(import_key).await
    }

    async fn fail(&self, import_key: &ImportKey, batch: &Batch) -> SyncResult<()> {
        self.check(StoreOperation::Fail).await?;
        self.store.fail(import_key, batch).await
    }

    async fn flush(&self, import_key: &ImportKey) -> SyncResult<u64> {
        self.store.flush(import_key).await
    }
}

impl<St> LockStore for FaultInjectingStore<St>
where
    St: LockStore + Send + Sync,
{
    async fn acquire_lock(
        &self,
        import_key: &ImportKey,
        ttl: Duration,
    ) -> SyncResult<LockAcquisition> {
        match self.fault(StoreOperation::AcquireLock).await {
            Some(FaultType::LockLost) => Ok(LockAcquisition::Busy),
            Some(FaultType::Unavailable) => Err(sync_error!(
                ErrorKind::QueueUnavailable,
                "Injected store fault",
                "AcquireLock was configured to fail"
            )),
            None => self.store.acquire_lock(import_key, ttl).await,
        }
    }

    async fn release_lock(&self, import_key: &ImportKey, token: LockToken) -> SyncResult<bool> {
        match self.fault(StoreOperation::ReleaseLock).await {
            Some(FaultType::LockLost) => Ok(false),
            Some(FaultType::Unavailable) => Err(sync_error!(
                ErrorKind::QueueUnavailable,
                "Injected store fault",
                "ReleaseLock was configured to fail"
            )),
            None => self.store.release_lock(import_key, token).await,
        }
    }

    async fn renew_lock(
        &self,
        import_key: &ImportKey,
        token: LockToken,
        ttl: Duration,
    ) -> SyncResult<bool> {
        match self.fault(StoreOperation::RenewLock).await {
            Some(FaultType::LockLost) => Ok(false),
            Some(FaultType::Unavailable) => Err(sync_error!(
                ErrorKind::QueueUnavailable,
                "Injected store fault",
                "RenewLock was configured to fail"
            )),
            None => self.store.renew_lock(import_key, token, ttl).await,
        }
    }
}

impl<St> VersionStore for FaultInjectingStore<St>
where
    St: VersionStore + Send + Sync,
{
    async fn reserve_versions(
        &self,
        import_key: &ImportKey,
        count: u64,
    ) -> SyncResult<RangeInclusive<RowVersion>> {
        self.check(StoreOperation::ReserveVersions).await?;
        self.store.reserve_versions(import_key, count).await
    }
}

impl<St> ScheduleStore for FaultInjectingStore<St>
where
    St: ScheduleStore + Send + Sync,
{
    async fn last_sync_time(&self, import_key: &ImportKey) -> SyncResult<Option<DateTime<Utc>>> {
        self.check(StoreOperation::LastSyncTime).await?;
        self.store.last_sync_time(import_key).await
    }

    async fn set_last_sync_time(
        &self,
        import_key: &ImportKey,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        self.store.set_last_sync_time(import_key, synced_at).await
    }
}
