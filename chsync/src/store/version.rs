use std::future::Future;
use std::ops::RangeInclusive;

use crate::error::SyncResult;
use crate::types::{ImportKey, RowVersion};

/// Durable per import key version counter.
///
/// Versions are strictly increasing, never reused and survive restarts, even when two
/// callers ask at the same time.
pub trait VersionStore {
    /// Atomically reserves `count` consecutive versions. `count` must be positive.
    fn reserve_versions(
        &self,
        import_key: &ImportKey,
        count: u64,
    ) -> impl Future<Output = SyncResult<RangeInclusive<RowVersion>>> + Send;

    /// Returns the next version.
    fn next_version(
        &self,
        import_key: &ImportKey,
    ) -> impl Future<Output = SyncResult<RowVersion>> + Send
    where
        Self: Sync,
    {
        async move {
            let range = self.reserve_versions(import_key, 1).await?;
            Ok(*range.end())
        }
    }
}
