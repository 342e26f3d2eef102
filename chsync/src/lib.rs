//! Change capture synchronization from a relational database into a columnar store.
//!
//! Mutations are captured by key through a [`recorder::ChangeRecorder`] into a durable
//! per table queue. A [`sync::SyncEngine`] drains the queue in rounds: it takes the table's
//! lock, collapses the batch to one intent per row, reads the current rows from the
//! [`source::Source`], serializes them for every target table, writes them with a single
//! insert per replica and only then removes the batch from the queue. Destination tables
//! use merge engines, so rows delivered twice after a failure merge away.

pub mod destination;
pub mod error;
pub mod failpoints;
mod macros;
pub mod metrics;
pub mod migrations;
pub mod recorder;
pub mod router;
pub mod serializer;
pub mod source;
pub mod store;
pub mod sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
