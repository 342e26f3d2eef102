use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

/// Duration of a single JSONEachRow INSERT from request start to server acknowledgement.
/// Labels: `table`, `replica`.
pub const CHSYNC_CH_INSERT_DURATION_SECONDS: &str = "chsync_ch_insert_duration_seconds";

/// Bytes of insert bodies sent to ClickHouse. Labels: `replica`.
pub const CHSYNC_CH_EGRESS_BYTES_TOTAL: &str = "chsync_ch_egress_bytes_total";

/// Register ClickHouse-specific metrics.
///
/// Safe to call multiple times, registration happens only once.
pub fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_histogram!(
            CHSYNC_CH_INSERT_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of JSONEachRow INSERT statements sent to ClickHouse, labeled by table and replica"
        );

        describe_counter!(
            CHSYNC_CH_EGRESS_BYTES_TOTAL,
            Unit::Bytes,
            "Total bytes of insert bodies sent to ClickHouse, labeled by replica"
        );
    });
}
