//! Destination stores receiving resolved batches.

mod base;
pub mod memory;

pub use base::Destination;
