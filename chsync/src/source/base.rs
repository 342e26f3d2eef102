use std::future::Future;

use crate::error::SyncResult;
use crate::types::{PrimaryKey, SourceRow};

/// Relational store holding the authoritative state of synchronized rows.
///
/// The engine only reads from it. A round resolves its batch to a set of primary keys and
/// fetches their current state in a single call.
pub trait Source {
    /// Returns the rows of `table` whose `key_column` is one of `keys`.
    ///
    /// Keys without a row are left out of the result; rows deleted after their mutation was
    /// captured are expected and not an error. The result order is unspecified.
    fn fetch_rows(
        &self,
        table: &str,
        key_column: &str,
        keys: &[PrimaryKey],
    ) -> impl Future<Output = SyncResult<Vec<SourceRow>>> + Send;
}
