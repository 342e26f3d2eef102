use std::sync::Arc;
use std::time::Instant;

use chsync::error::{ErrorKind, SyncError, SyncResult};
use chsync::sync_error;
use chsync::types::{DestinationRow, PrimaryKey};
use chsync_config::shared::ClickHouseConnectionConfig;
use clickhouse::Client;
use clickhouse::sql::Identifier;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::clickhouse::encoding::{decode_rows, encode_row};
use crate::clickhouse::metrics::{CHSYNC_CH_EGRESS_BYTES_TOTAL, CHSYNC_CH_INSERT_DURATION_SECONDS};

/// Capacity of the write buffer of one INSERT statement.
const BUFFERED_CAPACITY: usize = 256 * 1024;

/// Reads the merged state of a set of keys. Keys are compared in their textual form, so
/// numeric and string key columns both match.
const SELECT_CURRENT_SQL: &str = "SELECT * FROM ? FINAL WHERE has(?, toString(?))";

struct Inner {
    client: Client,
    alias: String,
    url: String,
    database: String,
}

/// Client of a single ClickHouse node, addressed by its alias.
///
/// Cheaply cloneable, clones share the underlying [`clickhouse::Client`].
#[derive(Clone)]
pub struct ClickHouseClient {
    inner: Arc<Inner>,
}

impl ClickHouseClient {
    /// Creates a client for the node configured under `alias`.
    ///
    /// No connection is made until the first request.
    pub fn new(alias: &str, config: &ClickHouseConnectionConfig) -> SyncResult<Self> {
        config.validate(alias).map_err(|err| {
            sync_error!(
                ErrorKind::ConfigError,
                "Invalid ClickHouse connection config",
                err
            )
        })?;

        let mut client = Client::default()
            .with_url(config.url.as_str())
            .with_user(config.user.as_str())
            .with_database(config.database.as_str())
            .with_option("output_format_json_quote_64bit_integers", "0")
            .with_option(
                "max_execution_time",
                config.timeout_ms.div_ceil(1_000).to_string(),
            );

        if let Some(password) = &config.password {
            client = client.with_password(password.expose_secret().as_str());
        }

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                alias: alias.to_string(),
                url: config.url.clone(),
                database: config.database.clone(),
            }),
        })
    }

    pub fn alias(&self) -> &str {
        &self.inner.alias
    }

    pub async fn ping(&self) -> SyncResult<()> {
        self.inner
            .client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map(|_| ())
            .map_err(|err| {
                sync_error!(
                    ErrorKind::DestinationConnectionFailed,
                    "ClickHouse is unreachable",
                    format!("connectivity check of `{}` failed: {err}", self.inner.alias)
                )
            })
    }

    /// Inserts `rows` into `table` with a single JSONEachRow INSERT statement.
    ///
    /// A statement the server rejected wrote nothing. Any other failure happened while the
    /// body was in flight and is reported as a partial write.
    pub(crate) async fn insert_rows(&self, table: &str, rows: &[DestinationRow]) -> SyncResult<()> {
        let sql = format!("INSERT INTO \"{table}\" FORMAT JSONEachRow");
        let started = Instant::now();

        let mut insert = self
            .inner
            .client
            .insert_formatted_with(sql)
            .buffered_with_capacity(BUFFERED_CAPACITY);
        let mut bytes = 0u64;
        let mut row_buf = Vec::new();

        for row in rows {
            row_buf.clear();
            encode_row(row, &mut row_buf)?;

            insert.write_buffered(&row_buf);
            bytes += row_buf.len() as u64;
        }

        insert
            .end()
            .await
            .map_err(|err| self.insert_error(table, err))?;

        metrics::histogram!(
            CHSYNC_CH_INSERT_DURATION_SECONDS,
            "table" => table.to_string(),
            "replica" => self.inner.alias.clone()
        )
        .record(started.elapsed().as_secs_f64());
        metrics::counter!(CHSYNC_CH_EGRESS_BYTES_TOTAL, "replica" => self.inner.alias.clone())
            .increment(bytes);
        debug!(replica = self.inner.alias, table, bytes, "inserted batch into clickhouse");

        Ok(())
    }

    /// Reads the merged rows of `table` whose `key_column` is one of `keys`.
    pub(crate) async fn select_current(
        &self,
        table: &str,
        key_column: &str,
        keys: &[PrimaryKey],
    ) -> SyncResult<Vec<DestinationRow>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<&str> = keys.iter().map(PrimaryKey::as_str).collect();

        let body = self
            .inner
            .client
            .query(SELECT_CURRENT_SQL)
            .bind(Identifier(table))
            .bind(keys)
            .bind(Identifier(key_column))
            .fetch_bytes("JSONEachRow")
            .map_err(|err| self.read_error(table, err))?
            .collect()
            .await
            .map_err(|err| self.read_error(table, err))?;

        decode_rows(&body)
    }

    fn insert_error(&self, table: &str, err: clickhouse::error::Error) -> SyncError {
        let kind = match &err {
            clickhouse::error::Error::BadResponse(_) => ErrorKind::DestinationWriteFailure,
            _ => ErrorKind::PartialDestinationWrite,
        };

        sync_error!(
            kind,
            "ClickHouse insert failed",
            format!("insert into `{table}` on `{}` failed: {err}", self.inner.alias)
        )
    }

    fn read_error(&self, table: &str, err: clickhouse::error::Error) -> SyncError {
        sync_error!(
            ErrorKind::DestinationReadFailure,
            "ClickHouse query failed",
            format!("reading `{table}` on `{}` failed: {err}", self.inner.alias)
        )
    }
}

impl std::fmt::Debug for ClickHouseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseClient")
            .field("alias", &self.inner.alias)
            .field("url", &self.inner.url)
            .field("database", &self.inner.database)
            .finish_non_exhaustive()
    }
}
