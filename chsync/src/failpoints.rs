use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

pub const SYNC_ROUND_BEFORE_DRAIN: &str = "sync_round.before_drain";
pub const SYNC_ROUND_BEFORE_RESOLVE: &str = "sync_round.before_resolve";
pub const SYNC_ROUND_BEFORE_SERIALIZE: &str = "sync_round.before_serialize";
pub const SYNC_ROUND_BEFORE_WRITE: &str = "sync_round.before_write";
/// Evaluated once the batch is written, in place of the commit.
pub const SYNC_ROUND_AFTER_WRITE: &str = "sync_round.after_write";

/// Returns an error when the fail point `name` is configured with `return`.
///
/// The optional argument selects the error kind: `queue`, `source`, `serialization` or
/// `destination`. Anything else yields an injected fault.
pub fn sync_fail_point(name: &str) -> SyncResult<()> {
    fail_point!(name, |parameter| {
        let kind = match parameter.as_deref() {
            Some("queue") => ErrorKind::QueueUnavailable,
            Some("source") => ErrorKind::SourceReadFailure,
            Some("serialization") => ErrorKind::SerializationFailure,
            Some("destination") => ErrorKind::DestinationWriteFailure,
            _ => ErrorKind::InjectedFault,
        };

        bail!(
            kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
