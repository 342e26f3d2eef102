use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::trace;

/// Port of the scrape endpoint started by [`init_metrics`].
pub const DEFAULT_METRICS_PORT: u16 = 9000;

/// Interval of the upkeep task spawned by [`init_metrics_handle`].
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// The recorder is global, installing it twice fails. Tests call `init_metrics_handle`
// many times, so the first handle is cached.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the Prometheus recorder and returns a handle that renders the scrape payload.
///
/// Repeated calls return the cached handle. Must be called inside a tokio runtime.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut cached = PROMETHEUS_HANDLE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(handle) = cached.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *cached = Some(handle.clone());

    let upkeep_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            upkeep_handle.run_upkeep();
        }
    });

    Ok(handle)
}

/// Installs the Prometheus recorder with its own HTTP listener on `[::]:port/metrics`.
pub fn init_metrics(port: Option<u16>, worker: Option<&str>) -> Result<(), BuildError> {
    let address = SocketAddr::new(
        IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        port.unwrap_or(DEFAULT_METRICS_PORT),
    );
    let mut builder = PrometheusBuilder::new().with_http_listener(address);

    if let Some(worker) = worker {
        builder = builder.add_global_label("worker", worker);
    }

    builder.install()
}
