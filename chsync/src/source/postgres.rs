use std::time::Duration;

use chsync_config::shared::{IntoConnectOptions, PgConnectionConfig};
use pg_escape::quote_identifier;
use serde_json::{Map, Value};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use tracing::debug;

use crate::error::{ErrorKind, SyncResult};
use crate::source::Source;
use crate::sync_error;
use crate::types::{PrimaryKey, SourceRow};

const MAX_POOL_CONNECTIONS: u32 = 4;

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Quotes a possibly schema qualified table name, e.g. `public.users`.
fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(|part| quote_identifier(part).into_owned())
        .collect::<Vec<_>>()
        .join(".")
}

/// Reads rows from a Postgres database as JSON objects.
///
/// Keys are compared in their textual form, so any key column type works as long as its
/// text cast matches the captured primary key.
#[derive(Debug, Clone)]
pub struct PostgresSource {
    pool: PgPool,
}

impl PostgresSource {
    pub fn new(config: &PgConnectionConfig) -> Self {
        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(MAX_POOL_CONNECTIONS)
            .idle_timeout(Some(IDLE_TIMEOUT))
            .connect_lazy_with(config.with_db());

        Self { pool }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl Source for PostgresSource {
    async fn fetch_rows(
        &self,
        table: &str,
        key_column: &str,
        keys: &[PrimaryKey],
    ) -> SyncResult<Vec<SourceRow>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "select t.{key}::text, to_jsonb(t) from {table} as t where t.{key}::text = any($1)",
            key = quote_identifier(key_column),
            table = quote_table(table),
        );
        let keys: Vec<&str> = keys.iter().map(PrimaryKey::as_str).collect();

        let rows = sqlx::query_as::<_, (String, Json<Map<String, Value>>)>(&query)
            .bind(&keys)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| {
                let kind = match &err {
                    sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                        ErrorKind::SourceConnectionFailed
                    }
                    _ => ErrorKind::SourceReadFailure,
                };

                sync_error!(
                    kind,
                    "Failed to read source rows",
                    format!("reading {} keys of `{table}` failed: {err}", keys.len()),
                    source: err
                )
            })?;

        debug!(table, requested = keys.len(), found = rows.len(), "fetched source rows");

        Ok(rows
            .into_iter()
            .map(|(primary_key, Json(values))| SourceRow::new(primary_key, values))
            .collect())
    }
}
