use std::ops::RangeInclusive;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chsync_config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;

use crate::error::{ErrorKind, SyncResult};
use crate::store::lock::{LockAcquisition, LockStore, LockToken};
use crate::store::queue::QueueStore;
use crate::store::schedule::ScheduleStore;
use crate::store::version::VersionStore;
use crate::sync_error;
use crate::types::{Batch, ImportKey, Mutation, Operation, OperationId, RowVersion};

/// Rounds of different tables share the pool, so it holds a few connections.
const MAX_POOL_CONNECTIONS: u32 = 8;

/// Duration after which idle connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a lazily connected pool. No connection is opened until the first query.
fn create_database_pool(config: &PgConnectionConfig) -> PgPool {
    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(MAX_POOL_CONNECTIONS)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .connect_lazy_with(config.with_db())
}

/// Store backed by tables in the `chsync` schema of a Postgres database.
///
/// The tables are created by [`crate::migrations::apply_sync_migrations`]. Operation ids
/// come from a `bigserial` and are assigned at insert time, so two concurrent enqueueing
/// transactions may commit out of id order. A batch drained between those commits skips the
/// lower id, which is picked up by a later round.
/// Lock expiry is evaluated with the database clock, which keeps workers with skewed
/// clocks consistent.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(config: &PgConnectionConfig) -> Self {
        Self {
            pool: create_database_pool(config),
        }
    }

    /// Builds a store on top of an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl QueueStore for PostgresStore {
    async fn enqueue_many(
        &self,
        import_key: &ImportKey,
        mutations: Vec<Mutation>,
    ) -> SyncResult<u64> {
        let mut primary_keys = Vec::with_capacity(mutations.len());
        let mut kinds = Vec::with_capacity(mutations.len());
        let mut captured_at = Vec::with_capacity(mutations.len());

        for mutation in mutations {
            primary_keys.push(mutation.primary_key.into_inner());
            kinds.push(mutation.kind.as_static_str().to_string());
            captured_at.push(mutation.captured_at);
        }

        let result = sqlx::query(
            r#"
            insert into chsync.sync_operations (import_key, primary_key, kind, enqueued_at)
            select $1, t.primary_key, t.kind, t.enqueued_at
            from unnest($2::text[], $3::text[], $4::timestamptz[])
                with ordinality as t(primary_key, kind, enqueued_at, position)
            order by t.position
            "#,
        )
        .bind(import_key.as_str())
        .bind(&primary_keys)
        .bind(&kinds)
        .bind(&captured_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn peek_batch(&self, import_key: &ImportKey, max_size: usize) -> SyncResult<Batch> {
        let rows = sqlx::query_as::<_, (i64, String, String, DateTime<Utc>)>(
            r#"
            select id, primary_key, kind, enqueued_at
            from chsync.sync_operations
            where import_key = $1
            order by id
            limit $2
            "#,
        )
        .bind(import_key.as_str())
        .bind(i64::try_from(max_size).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut operations = Vec::with_capacity(rows.len());
        for (id, primary_key, kind, enqueued_at) in rows {
            let id = u64::try_from(id).map_err(|_| {
                sync_error!(
                    ErrorKind::InvalidData,
                    "Negative operation id",
                    format!("operation id {id} of `{import_key}` is negative")
                )
            })?;

            operations.push(Operation {
                id: OperationId(id),
                import_key: import_key.clone(),
                primary_key: primary_key.into(),
                kind: kind.parse()?,
                enqueued_at,
            });
        }

        Ok(Batch::new(import_key.clone(), operations))
    }

    async fn commit(&self, import_key: &ImportKey, batch: &Batch) -> SyncResult<u64> {
        let ids: Vec<i64> = batch
            .operation_ids()
            .into_iter()
            .filter_map(|id| i64::try_from(id.0).ok())
            .collect();

        let result = sqlx::query(
            r#"
            delete from chsync.sync_operations
            where import_key = $1 and id = any($2)
            "#,
        )
        .bind(import_key.as_str())
        .bind(&ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn size(&self, import_key: &ImportKey) -> SyncResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            select count(*) from chsync.sync_operations where import_key = $1
            "#,
        )
        .bind(import_key.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn flush(&self, import_key: &ImportKey) -> SyncResult<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            delete from chsync.sync_operations where import_key = $1
            "#,
        )
        .bind(import_key.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            delete from chsync.sync_locks where import_key = $1
            "#,
        )
        .bind(import_key.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            delete from chsync.sync_schedule where import_key = $1
            "#,
        )
        .bind(import_key.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected())
    }
}

impl LockStore for PostgresStore {
    async fn acquire_lock(
        &self,
        import_key: &ImportKey,
        ttl: Duration,
    ) -> SyncResult<LockAcquisition> {
        let token = LockToken::generate();

        // A conflicting row is only replaced once expired. No returned row means a live owner.
        let hard_released: Option<bool> = sqlx::query_scalar(
            r#"
            with previous as (
                select 1 from chsync.sync_locks where import_key = $1
            )
            insert into chsync.sync_locks (import_key, token, acquired_at, expires_at)
            values ($1, $2, now(), now() + make_interval(secs => $3))
            on conflict (import_key) do update
                set token = excluded.token,
                    acquired_at = excluded.acquired_at,
                    expires_at = excluded.expires_at
                where chsync.sync_locks.expires_at <= now()
            returning exists (select 1 from previous)
            "#,
        )
        .bind(import_key.as_str())
        .bind(token.as_uuid())
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        match hard_released {
            Some(hard_released) => {
                debug!(import_key = %import_key, %token, "sync lock acquired");
                Ok(LockAcquisition::Acquired {
                    token,
                    hard_released,
                })
            }
            None => Ok(LockAcquisition::Busy),
        }
    }

    async fn release_lock(&self, import_key: &ImportKey, token: LockToken) -> SyncResult<bool> {
        // Expired rows stay so that the next owner can report the hard release.
        let result = sqlx::query(
            r#"
            delete from chsync.sync_locks
            where import_key = $1 and token = $2 and expires_at > now()
            "#,
        )
        .bind(import_key.as_str())
        .bind(token.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn renew_lock(
        &self,
        import_key: &ImportKey,
        token: LockToken,
        ttl: Duration,
    ) -> SyncResult<bool> {
        let result = sqlx::query(
            r#"
            update chsync.sync_locks
            set expires_at = now() + make_interval(secs => $3)
            where import_key = $1 and token = $2 and expires_at > now()
            "#,
        )
        .bind(import_key.as_str())
        .bind(token.as_uuid())
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl VersionStore for PostgresStore {
    async fn reserve_versions(
        &self,
        import_key: &ImportKey,
        count: u64,
    ) -> SyncResult<RangeInclusive<RowVersion>> {
        let count = i64::try_from(count).map_err(|_| {
            sync_error!(
                ErrorKind::InvalidData,
                "Version reservation too large",
                format!("cannot reserve {count} versions at once")
            )
        })?;

        let last: i64 = sqlx::query_scalar(
            r#"
            insert into chsync.sync_versions (import_key, version)
            values ($1, $2)
            on conflict (import_key) do update
                set version = chsync.sync_versions.version + excluded.version
            returning version
            "#,
        )
        .bind(import_key.as_str())
        .bind(count)
        .fetch_one(&self.pool)
        .await?;

        let last = last as u64;
        Ok(last + 1 - count as u64..=last)
    }
}

impl ScheduleStore for PostgresStore {
    async fn last_sync_time(&self, import_key: &ImportKey) -> SyncResult<Option<DateTime<Utc>>> {
        let synced_at = sqlx::query_scalar(
            r#"
            select last_synced_at from chsync.sync_schedule where import_key = $1
            "#,
        )
        .bind(import_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(synced_at)
    }

    async fn set_last_sync_time(
        &self,
        import_key: &ImportKey,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        sqlx::query(
            r#"
            insert into chsync.sync_schedule (import_key, last_synced_at)
            values ($1, $2)
            on conflict (import_key) do update set last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(import_key.as_str())
        .bind(synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
