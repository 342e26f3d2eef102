//! Stores implementing every store trait at once.

pub mod memory;
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;
