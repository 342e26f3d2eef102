pub mod client;
mod core;
mod encoding;
mod metrics;

pub use client::ClickHouseClient;
pub use self::core::ClickHouseDestination;
