//! Shared configuration types for sync workers.

mod base;
mod connection;
mod destination;
mod service;
mod store;
mod sync;
mod table;

pub use base::ValidationError;
pub use connection::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
pub use destination::ClickHouseConnectionConfig;
pub use service::SyncServiceConfig;
pub use store::{RedisConfig, StoreConfig};
pub use sync::SyncConfig;
pub use table::{RoutingConfig, TableSyncConfig, WriteMode};
