use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::SyncResult;
use crate::types::ImportKey;

/// Bookkeeping used to decide which tables are due for a round.
pub trait ScheduleStore {
    fn last_sync_time(
        &self,
        import_key: &ImportKey,
    ) -> impl Future<Output = SyncResult<Option<DateTime<Utc>>>> + Send;

    fn set_last_sync_time(
        &self,
        import_key: &ImportKey,
        synced_at: DateTime<Utc>,
    ) -> impl Future<Output = SyncResult<()>> + Send;
}
