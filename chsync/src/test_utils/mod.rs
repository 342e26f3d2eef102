//! Helpers for tests of the sync engine and of crates built on it.
//!
//! - [`faulty_store`] wraps a store and makes chosen operations fail.
//! - [`test_destination`] wraps a destination, records inserts and can fail them.
//! - [`test_source`] wraps a source to slow fetches down or act in the middle of a round.
//! - [`failpoints`] configures `fail` crate fail points for the duration of a test.
//! - [`fixtures`] builds tables, rows and engines backed by in-memory components.

pub mod failpoints;
pub mod faulty_store;
pub mod fixtures;
pub mod test_destination;
pub mod test_source;
