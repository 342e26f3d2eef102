use std::future::Future;

use crate::error::SyncResult;
use crate::types::{DestinationRow, PrimaryKey, ReplicaAlias};

/// Columnar store receiving the rows of sync rounds.
///
/// The store has no transactions and no row level update or delete. Every state change is
/// written as a new row, and the table's merge engine collapses stale copies.
pub trait Destination {
    /// Returns the name of the destination.
    fn name() -> &'static str;

    /// Inserts `rows` into `table` on every replica of `targets`.
    ///
    /// Each replica receives the whole batch in a single multi row insert. Implementations
    /// do not retry: a failed or interrupted insert on any replica fails the call, since
    /// the caller cannot tell which rows landed. Returns the number of rows inserted per
    /// replica.
    fn insert_batch(
        &self,
        targets: &[ReplicaAlias],
        table: &str,
        rows: &[DestinationRow],
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Returns the current, merged state of the rows of `table` whose `key_column` is one of
    /// `keys`, as seen by `replica`.
    fn fetch_current_rows(
        &self,
        replica: &ReplicaAlias,
        table: &str,
        key_column: &str,
        keys: &[PrimaryKey],
    ) -> impl Future<Output = SyncResult<Vec<DestinationRow>>> + Send;

    /// Releases connections. The default implementation does nothing.
    fn shutdown(&self) -> impl Future<Output = SyncResult<()>> + Send {
        async { Ok(()) }
    }
}
