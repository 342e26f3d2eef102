use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Process wide sync defaults.
///
/// Every value can be overridden per table through
/// [`TableSyncConfig`](crate::shared::TableSyncConfig).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Maximum number of queued operations drained by one round.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Minimum time, in milliseconds, between two rounds of the same table.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Lock time to live in milliseconds. Derived from `delay_ms` when unset.
    #[serde(default)]
    pub lock_ttl_ms: Option<u64>,
}

impl SyncConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 10_000;

    pub const DEFAULT_DELAY_MS: u64 = 5_000;

    /// Multiplier applied to the delay when no explicit lock TTL is configured.
    pub const LOCK_TTL_DELAY_FACTOR: u64 = 10;

    /// Lower bound of a lock TTL derived from the delay. Explicit TTLs are not bounded.
    pub const MIN_DERIVED_LOCK_TTL_MS: u64 = 10_000;

    /// Returns the configured lock TTL or the one derived from `delay_ms`.
    pub fn effective_lock_ttl_ms(&self) -> u64 {
        self.lock_ttl_ms
            .unwrap_or_else(|| Self::derive_lock_ttl_ms(self.delay_ms))
    }

    /// Returns `delay_ms * LOCK_TTL_DELAY_FACTOR`, never less than
    /// [`Self::MIN_DERIVED_LOCK_TTL_MS`], so that a zero delay still yields a usable lock.
    pub fn derive_lock_ttl_ms(delay_ms: u64) -> u64 {
        delay_ms
            .saturating_mul(Self::LOCK_TTL_DELAY_FACTOR)
            .max(Self::MIN_DERIVED_LOCK_TTL_MS)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "sync.batch_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.effective_lock_ttl_ms() == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "sync.lock_ttl_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            delay_ms: default_delay_ms(),
            lock_ttl_ms: None,
        }
    }
}

fn default_batch_size() -> usize {
    SyncConfig::DEFAULT_BATCH_SIZE
}

fn default_delay_ms() -> u64 {
    SyncConfig::DEFAULT_DELAY_MS
}
