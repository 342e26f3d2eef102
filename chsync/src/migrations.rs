use chsync_config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::{Executor, postgres::PgPoolOptions};
use tracing::info;

use crate::error::SyncResult;

/// Creates the `chsync` schema and applies the store migrations to it.
///
/// The `search_path` points at `chsync` so that the `_sqlx_migrations` bookkeeping table
/// lives next to the store tables instead of in `public`.
pub async fn apply_sync_migrations(connection_config: &PgConnectionConfig) -> SyncResult<()> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists chsync;").await?;
                conn.execute("set search_path = 'chsync';").await?;

                Ok(())
            })
        })
        .connect_with(connection_config.with_db())
        .await?;

    info!("applying chsync store migrations");

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("chsync store migrations applied");

    Ok(())
}
