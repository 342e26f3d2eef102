//! Metric names and labels emitted by the sync engine.
//!
//! Values are reported through the [`metrics`] facade; installing an exporter is up to the
//! host process (see `chsync-telemetry`).

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

pub const IMPORT_KEY_LABEL: &str = "import_key";
pub const STEP_LABEL: &str = "step";
pub const OUTCOME_LABEL: &str = "outcome";
pub const ERROR_KIND_LABEL: &str = "error_kind";
pub const OPERATION_KIND_LABEL: &str = "operation_kind";
pub const TABLE_LABEL: &str = "table";
pub const DESTINATION_LABEL: &str = "destination";

pub const CHSYNC_ROUND_DURATION_SECONDS: &str = "chsync_round_duration_seconds";
pub const CHSYNC_ROUND_STEP_DURATION_SECONDS: &str = "chsync_round_step_duration_seconds";
pub const CHSYNC_ROUNDS_TOTAL: &str = "chsync_rounds_total";
pub const CHSYNC_ROUND_ERRORS_TOTAL: &str = "chsync_round_errors_total";
pub const CHSYNC_ROUND_FAILED_BATCHES_TOTAL: &str = "chsync_round_failed_batches_total";
pub const CHSYNC_QUEUE_DEPTH: &str = "chsync_queue_depth";
pub const CHSYNC_LOCK_TIMEOUTS_TOTAL: &str = "chsync_lock_timeouts_total";
pub const CHSYNC_LOCK_HARD_RELEASES_TOTAL: &str = "chsync_lock_hard_releases_total";
pub const CHSYNC_BATCH_OPERATIONS: &str = "chsync_batch_operations";
pub const CHSYNC_ROWS_INSERTED_TOTAL: &str = "chsync_rows_inserted_total";
pub const CHSYNC_OPERATIONS_RECORDED_TOTAL: &str = "chsync_operations_recorded_total";

/// Registers descriptions of all engine metrics. Only the first call has an effect.
pub fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_histogram!(
            CHSYNC_ROUND_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of a sync round, labeled by outcome"
        );
        describe_histogram!(
            CHSYNC_ROUND_STEP_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of each step of a sync round"
        );
        describe_counter!(
            CHSYNC_ROUNDS_TOTAL,
            Unit::Count,
            "Sync rounds by outcome: skipped, empty, committed, failed"
        );
        describe_counter!(
            CHSYNC_ROUND_ERRORS_TOTAL,
            Unit::Count,
            "Failed sync rounds by error kind"
        );
        describe_counter!(
            CHSYNC_ROUND_FAILED_BATCHES_TOTAL,
            Unit::Count,
            "Batches left in the queue by a failed round"
        );
        describe_gauge!(
            CHSYNC_QUEUE_DEPTH,
            Unit::Count,
            "Pending operations per import key"
        );
        describe_counter!(
            CHSYNC_LOCK_TIMEOUTS_TOTAL,
            Unit::Count,
            "Rounds skipped because another owner held the lock"
        );
        describe_counter!(
            CHSYNC_LOCK_HARD_RELEASES_TOTAL,
            Unit::Count,
            "Locks taken over after their previous owner let them expire"
        );
        describe_histogram!(
            CHSYNC_BATCH_OPERATIONS,
            Unit::Count,
            "Operations drained per sync round"
        );
        describe_counter!(
            CHSYNC_ROWS_INSERTED_TOTAL,
            Unit::Count,
            "Rows inserted into destination tables"
        );
        describe_counter!(
            CHSYNC_OPERATIONS_RECORDED_TOTAL,
            Unit::Count,
            "Operations handed to the queue by the recorder"
        );
    });
}
