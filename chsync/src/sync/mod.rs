//! Sync rounds: table registration, settings resolution and the round state machine.
//!
//! A round takes the lock of its import key, drains the oldest queued operations, resolves
//! them to one intent per primary key, reads the current source rows, serializes them for
//! every target, writes them and finally removes the drained operations from the queue.
//! Any failure leaves the queue untouched, so the next round retries the same work.

pub mod context;
pub mod engine;
pub mod round;
pub mod table;

pub use context::RoundContext;
pub use engine::SyncEngine;
pub use round::{RoundOutcome, RoundStep};
pub use table::{SyncTarget, TableEngine, TableSync};
