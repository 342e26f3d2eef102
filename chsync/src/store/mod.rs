//! Durable coordination state of the engine: the operation queue, the per key locks, the
//! version counters and the last sync times.
//!
//! Each concern is a trait so that a store can be wrapped or replaced in tests. The backends
//! in [`both`] implement all of them, and [`any::AnyStore`] selects one from configuration.

pub mod any;
pub mod both;
pub mod lock;
pub mod queue;
pub mod schedule;
pub mod version;

use crate::store::lock::LockStore;
use crate::store::queue::QueueStore;
use crate::store::schedule::ScheduleStore;
use crate::store::version::VersionStore;

/// Every capability a sync round needs from its backing store.
pub trait SyncStore: QueueStore + LockStore + VersionStore + ScheduleStore {}

impl<T> SyncStore for T where T: QueueStore + LockStore + VersionStore + ScheduleStore {}
