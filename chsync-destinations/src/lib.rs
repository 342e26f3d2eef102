//! Destination implementations for the chsync engine.
//!
//! Each destination lives behind a feature of the same name.

#[cfg(feature = "clickhouse")]
pub mod clickhouse;
