use std::ops::RangeInclusive;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chsync_config::shared::RedisConfig;
use fred::prelude::{
    Client, ClientLike, EventInterface, KeysInterface, LuaInterface, Pool, ReconnectPolicy, Server,
    ServerConfig, SortedSetsInterface,
};
use fred::types::Builder;
use futures::future::join_all;
use secrecy::ExposeSecret;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::store::lock::{LockAcquisition, LockStore, LockToken};
use crate::store::queue::QueueStore;
use crate::store::schedule::ScheduleStore;
use crate::store::version::VersionStore;
use crate::types::{Batch, ImportKey, Mutation, Operation, OperationId, RowVersion};
use crate::{bail, sync_error};

/// Assigns ids from the per key sequence and adds one sorted set member per mutation.
const ENQUEUE_SCRIPT: &str = r#"
local last = redis.call('INCRBY', KEYS[2], #ARGV)
local first = last - #ARGV
for i, payload in ipairs(ARGV) do
    local id = first + i
    redis.call('ZADD', KEYS[1], id, id .. ':' .. payload)
end
return #ARGV
"#;

const PEEK_SCRIPT: &str = r#"
return redis.call('ZRANGE', KEYS[1], 0, tonumber(ARGV[1]) - 1)
"#;

const FLUSH_SCRIPT: &str = r#"
local count = redis.call('ZCARD', KEYS[1])
redis.call('DEL', KEYS[1], KEYS[2], KEYS[3], KEYS[4])
return count
"#;

/// Returns 0 when busy, 1 when acquired, 2 when acquired over an expired owner.
///
/// The owner key has no TTL. It outlives an expired lock and betrays the hard release.
const ACQUIRE_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
    local previous = redis.call('GET', KEYS[2])
    redis.call('SET', KEYS[2], ARGV[1])
    if previous then
        return 2
    end
    return 1
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('DEL', KEYS[1], KEYS[2])
    return 1
end
return 0
"#;

const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

fn store_error<E>(description: &'static str) -> impl FnOnce(E) -> SyncError
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |err| sync_error!(ErrorKind::QueueUnavailable, description, err.to_string(), source: err)
}

/// Store backed by Redis.
///
/// Every import key owns a sorted set of operations scored by a per key sequence, a lock
/// key with a TTL, an owner key, a version counter and a last sync timestamp. Keys of one
/// import key share a hash tag so the scripts touching several of them stay on one slot.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    key_prefix: String,
}

impl RedisStore {
    /// Connects a pool of `config.pool_size` clients and waits for the connections.
    pub async fn connect(config: &RedisConfig) -> SyncResult<Self> {
        let pool = Builder::default_centralized()
            .with_config(|redis_config| {
                redis_config.username = config.username.clone();
                redis_config.password = config
                    .password
                    .as_ref()
                    .map(|password| password.expose_secret().to_string());
                redis_config.server = ServerConfig::Centralized {
                    server: Server::new(config.host.clone(), config.port),
                };
            })
            .with_connection_config(|connection| {
                connection.internal_command_timeout = Duration::from_secs(5);
                connection.reconnect_on_auth_error = true;
            })
            .with_performance_config(|performance| {
                performance.default_command_timeout = Duration::from_secs(5);
            })
            .set_policy(ReconnectPolicy::new_exponential(0, 1, 2000, 5))
            .build_pool(config.pool_size)
            .map_err(store_error("Failed to build Redis pool"))?;

        for client in pool.clients() {
            let mut error_rx = client.error_rx();
            tokio::spawn(async move {
                loop {
                    match error_rx.recv().await {
                        Ok((err, server)) => error!(?server, "redis store client error: {err:?}"),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            });
        }

        let connections = pool.connect_pool();
        pool.wait_for_connect()
            .await
            .map_err(store_error("Failed to connect to Redis"))?;
        debug!(host = %config.host, port = config.port, "redis store connected");

        tokio::spawn(async move {
            let _ = join_all(connections).await;
        });

        Ok(Self {
            pool,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn client(&self) -> &Client {
        self.pool.next()
    }

    fn key(&self, import_key: &ImportKey, suffix: &str) -> String {
        format!("{}:{{{}}}:{suffix}", self.key_prefix, import_key.as_str())
    }

    fn operations_key(&self, import_key: &ImportKey) -> String {
        self.key(import_key, "operations")
    }
}

/// Sorted set member of an operation: `{id}:{captured_at_micros}:{kind}:{primary_key}`.
fn operation_member(operation: &Operation) -> String {
    format!(
        "{}:{}:{}:{}",
        operation.id,
        operation.enqueued_at.timestamp_micros(),
        operation.kind,
        operation.primary_key
    )
}

fn parse_member(import_key: &ImportKey, member: &str) -> SyncResult<Operation> {
    let mut parts = member.splitn(4, ':');
    let (Some(id), Some(micros), Some(kind), Some(primary_key)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!(
            ErrorKind::InvalidData,
            "Malformed queued operation",
            format!("member `{member}` of `{import_key}` has less than four fields")
        );
    };

    let micros: i64 = micros.parse()?;
    let Some(enqueued_at) = DateTime::<Utc>::from_timestamp_micros(micros) else {
        bail!(
            ErrorKind::InvalidData,
            "Malformed queued operation",
            format!("timestamp {micros} of member `{member}` is out of range")
        );
    };

    Ok(Operation {
        id: OperationId(id.parse()?),
        import_key: import_key.clone(),
        primary_key: primary_key.into(),
        kind: kind.parse()?,
        enqueued_at,
    })
}

impl QueueStore for RedisStore {
    async fn enqueue_many(
        &self,
        import_key: &ImportKey,
        mutations: Vec<Mutation>,
    ) -> SyncResult<u64> {
        if mutations.is_empty() {
            return Ok(0);
        }

        let payloads: Vec<String> = mutations
            .iter()
            .map(|mutation| {
                format!(
                    "{}:{}:{}",
                    mutation.captured_at.timestamp_micros(),
                    mutation.kind,
                    mutation.primary_key
                )
            })
            .collect();

        let keys = vec![
            self.operations_key(import_key),
            self.key(import_key, "sequence"),
        ];
        let queued: i64 = self
            .client()
            .eval(ENQUEUE_SCRIPT, keys, payloads)
            .await
            .map_err(store_error("Failed to enqueue operations"))?;

        Ok(queued.max(0) as u64)
    }

    async fn peek_batch(&self, import_key: &ImportKey, max_size: usize) -> SyncResult<Batch> {
        if max_size == 0 {
            return Ok(Batch::empty(import_key.clone()));
        }

        let members: Vec<String> = self
            .client()
            .eval(
                PEEK_SCRIPT,
                vec![self.operations_key(import_key)],
                vec![max_size.to_string()],
            )
            .await
            .map_err(store_error("Failed to read queued operations"))?;

        let operations = members
            .iter()
            .map(|member| parse_member(import_key, member))
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(Batch::new(import_key.clone(), operations))
    }

    async fn commit(&self, import_key: &ImportKey, batch: &Batch) -> SyncResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let members: Vec<String> = batch.operations().iter().map(operation_member).collect();
        let removed: i64 = self
            .client()
            .zrem(self.operations_key(import_key), members)
            .await
            .map_err(store_error("Failed to commit operations"))?;

        Ok(removed.max(0) as u64)
    }

    async fn size(&self, import_key: &ImportKey) -> SyncResult<u64> {
        let size: i64 = self
            .client()
            .zcard(self.operations_key(import_key))
            .await
            .map_err(store_error("Failed to read queue size"))?;

        Ok(size.max(0) as u64)
    }

    async fn flush(&self, import_key: &ImportKey) -> SyncResult<u64> {
        let flushed: i64 = self
            .client()
            .eval(
                FLUSH_SCRIPT,
                vec![
                    self.operations_key(import_key),
                    self.key(import_key, "lock"),
                    self.key(import_key, "lock_owner"),
                    self.key(import_key, "last_sync"),
                ],
                Vec::<String>::new(),
            )
            .await
            .map_err(store_error("Failed to flush operations"))?;

        Ok(flushed.max(0) as u64)
    }
}

impl LockStore for RedisStore {
    async fn acquire_lock(
        &self,
        import_key: &ImportKey,
        ttl: Duration,
    ) -> SyncResult<LockAcquisition> {
        let token = LockToken::generate();
        let keys = vec![self.key(import_key, "lock"), self.key(import_key, "lock_owner")];
        let args = vec![token.to_string(), ttl.as_millis().to_string()];

        let status: i64 = self
            .client()
            .eval(ACQUIRE_SCRIPT, keys, args)
            .await
            .map_err(store_error("Failed to acquire sync lock"))?;

        Ok(match status {
            0 => LockAcquisition::Busy,
            status => LockAcquisition::Acquired {
                token,
                hard_released: status == 2,
            },
        })
    }

    async fn release_lock(&self, import_key: &ImportKey, token: LockToken) -> SyncResult<bool> {
        let keys = vec![self.key(import_key, "lock"), self.key(import_key, "lock_owner")];

        let released: i64 = self
            .client()
            .eval(RELEASE_SCRIPT, keys, vec![token.to_string()])
            .await
            .map_err(store_error("Failed to release sync lock"))?;

        Ok(released == 1)
    }

    async fn renew_lock(
        &self,
        import_key: &ImportKey,
        token: LockToken,
        ttl: Duration,
    ) -> SyncResult<bool> {
        let args = vec![token.to_string(), ttl.as_millis().to_string()];

        let renewed: i64 = self
            .client()
            .eval(RENEW_SCRIPT, vec![self.key(import_key, "lock")], args)
            .await
            .map_err(store_error("Failed to renew sync lock"))?;

        Ok(renewed == 1)
    }
}

impl VersionStore for RedisStore {
    async fn reserve_versions(
        &self,
        import_key: &ImportKey,
        count: u64,
    ) -> SyncResult<RangeInclusive<RowVersion>> {
        let Ok(increment) = i64::try_from(count) else {
            bail!(
                ErrorKind::InvalidData,
                "Version reservation too large",
                format!("cannot reserve {count} versions at once")
            );
        };

        let last: i64 = self
            .client()
            .incr_by(self.key(import_key, "version"), increment)
            .await
            .map_err(store_error("Failed to reserve versions"))?;

        let last = last as u64;
        Ok(last + 1 - count..=last)
    }
}

impl ScheduleStore for RedisStore {
    async fn last_sync_time(&self, import_key: &ImportKey) -> SyncResult<Option<DateTime<Utc>>> {
        let value: Option<String> = self
            .client()
            .get(self.key(import_key, "last_sync"))
            .await
            .map_err(store_error("Failed to read last sync time"))?;

        match value {
            Some(value) => Ok(Some(DateTime::parse_from_rfc3339(&value)?.with_timezone(&Utc))),
            None => Ok(None),
        }
    }

    async fn set_last_sync_time(
        &self,
        import_key: &ImportKey,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        let _: () = self
            .client()
            .set(
                self.key(import_key, "last_sync"),
                synced_at.to_rfc3339(),
                None,
                None,
                false,
            )
            .await
            .map_err(store_error("Failed to write last sync time"))?;

        Ok(())
    }
}
