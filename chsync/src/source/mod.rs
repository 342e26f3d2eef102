//! Read back of the current state of source rows.

mod base;
pub mod memory;
pub mod postgres;

pub use base::Source;
