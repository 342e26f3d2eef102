use std::ops::RangeInclusive;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chsync_config::shared::StoreConfig;
use tracing::info;

use crate::error::SyncResult;
use crate::store::both::memory::MemoryStore;
use crate::store::both::postgres::PostgresStore;
#[cfg(feature = "redis")]
use crate::store::both::redis::RedisStore;
use crate::store::lock::{LockAcquisition, LockStore, LockToken};
use crate::store::queue::QueueStore;
use crate::store::schedule::ScheduleStore;
use crate::store::version::VersionStore;
use crate::types::{Batch, ImportKey, Mutation, RowVersion};

/// The store selected by a [`StoreConfig`].
#[derive(Clone)]
pub enum AnyStore {
    Memory(MemoryStore),
    Postgres(PostgresStore),
    #[cfg(feature = "redis")]
    Redis(RedisStore),
}

impl AnyStore {
    /// Builds the configured store.
    ///
    /// Postgres pools connect lazily and expect the schema created by
    /// [`crate::migrations::apply_sync_migrations`]. Redis pools connect eagerly.
    pub async fn from_config(config: &StoreConfig) -> SyncResult<Self> {
        let store = match config {
            StoreConfig::Memory => AnyStore::Memory(MemoryStore::new()),
            StoreConfig::Postgres { connection } => {
                AnyStore::Postgres(PostgresStore::new(connection))
            }
            #[cfg(feature = "redis")]
            StoreConfig::Redis(redis) => AnyStore::Redis(RedisStore::connect(redis).await?),
            #[cfg(not(feature = "redis"))]
            StoreConfig::Redis(_) => crate::bail!(
                crate::error::ErrorKind::ConfigError,
                "Redis store not available",
                "chsync was built without the `redis` feature"
            ),
        };

        info!(store = store.name(), "sync store ready");

        Ok(store)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AnyStore::Memory(_) => "memory",
            AnyStore::Postgres(_) => "postgres",
            #[cfg(feature = "redis")]
            AnyStore::Redis(_) => "redis",
        }
    }
}

macro_rules! delegate {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            AnyStore::Memory($store) => $call,
            AnyStore::Postgres($store) => $call,
            #[cfg(feature = "redis")]
            AnyStore::Redis($store) => $call,
        }
    };
}

impl QueueStore for AnyStore {
    async fn enqueue_many(
        &self,
        import_key: &ImportKey,
        mutations: Vec<Mutation>,
    ) -> SyncResult<u64> {
        delegate!(self, store => store.enqueue_many(import_key, mutations).await)
    }

    async fn peek_batch(&self, import_key: &ImportKey, max_size: usize) -> SyncResult<Batch> {
        delegate!(self, store => store.peek_batch(import_key, max_size).await)
    }

    async fn commit(&self, import_key: &ImportKey, batch: &Batch) -> SyncResult<u64> {
        delegate!(self, store => store.commit(import_key, batch).await)
    }

    async fn size(&self, import_key: &ImportKey) -> SyncResult<u64> {
        delegate!(self, store => store.size(import_key).await)
    }

    async fn flush(&self, import_key: &ImportKey) -> SyncResult<u64> {
        delegate!(self, store => store.flush(import_key).await)
    }
}

impl LockStore for AnyStore {
    async fn acquire_lock(
        &self,
        import_key: &ImportKey,
        ttl: Duration,
    ) -> SyncResult<LockAcquisition> {
        delegate!(self, store => store.acquire_lock(import_key, ttl).await)
    }

    async fn release_lock(&self, import_key: &ImportKey, token: LockToken) -> SyncResult<bool> {
        delegate!(self, store => store.release_lock(import_key, token).await)
    }

    async fn renew_lock(
        &self,
        import_key: &ImportKey,
        token: LockToken,
        ttl: Duration,
    ) -> SyncResult<bool> {
        delegate!(self, store => store.renew_lock(import_key, token, ttl).await)
    }
}

impl VersionStore for AnyStore {
    async fn reserve_versions(
        &self,
        import_key: &ImportKey,
        count: u64,
    ) -> SyncResult<RangeInclusive<RowVersion>> {
        delegate!(self, store => store.reserve_versions(import_key, count).await)
    }
}

impl ScheduleStore for AnyStore {
    async fn last_sync_time(&self, import_key: &ImportKey) -> SyncResult<Option<DateTime<Utc>>> {
        delegate!(self, store => store.last_sync_time(import_key).await)
    }

    async fn set_last_sync_time(
        &self,
        import_key: &ImportKey,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        delegate!(self, store => store.set_last_sync_time(import_key, synced_at).await)
    }
}
