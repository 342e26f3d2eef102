use std::fmt;
use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use crate::error::SyncResult;
use crate::types::ImportKey;

/// Proof of lock ownership handed out by [`LockStore::acquire_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of a non blocking lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquisition {
    Acquired {
        token: LockToken,
        /// The previous owner let its lock expire instead of releasing it.
        hard_released: bool,
    },
    /// A live owner holds the lock.
    Busy,
}

/// Per import key mutual exclusion across processes.
///
/// Locks expire after their TTL so that a killed owner cannot block a table forever.
/// Taking over an expired lock is reported as a hard release.
pub trait LockStore {
    /// Tries to take the lock of `import_key` for `ttl`. Never waits.
    fn acquire_lock(
        &self,
        import_key: &ImportKey,
        ttl: Duration,
    ) -> impl Future<Output = SyncResult<LockAcquisition>> + Send;

    /// Releases the lock if `token` still owns it. Returns `false` for stale tokens.
    fn release_lock(
        &self,
        import_key: &ImportKey,
        token: LockToken,
    ) -> impl Future<Output = SyncResult<bool>> + Send;

    /// Extends the lock to `ttl` from now if `token` still owns it.
    fn renew_lock(
        &self,
        import_key: &ImportKey,
        token: LockToken,
        ttl: Duration,
    ) -> impl Future<Output = SyncResult<bool>> + Send;
}
