use std::time::Duration;

use chsync_config::shared::{SyncConfig, TableSyncConfig};

use crate::types::ImportKey;

/// Settings of one round, resolved once when the round starts.
///
/// Each value is taken from the table's overrides when set, else from the process defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundContext {
    pub import_key: ImportKey,
    pub batch_size: usize,
    pub delay: Duration,
    pub lock_ttl: Duration,
}

impl RoundContext {
    pub fn resolve(import_key: &ImportKey, defaults: &SyncConfig, table: &TableSyncConfig) -> Self {
        let batch_size = table.batch_size.unwrap_or(defaults.batch_size);
        let delay_ms = table.delay_ms.unwrap_or(defaults.delay_ms);
        let lock_ttl_ms = table
            .lock_ttl_ms
            .or(defaults.lock_ttl_ms)
            .unwrap_or_else(|| SyncConfig::derive_lock_ttl_ms(delay_ms));

        Self {
            import_key: import_key.clone(),
            batch_size,
            delay: Duration::from_millis(delay_ms),
            lock_ttl: Duration::from_millis(lock_ttl_ms),
        }
    }
}
