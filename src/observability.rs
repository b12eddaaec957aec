use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing_subscriber::EnvFilter;

use crate::engine::EngineError;

// ── RED metrics (operation-driven) ──────────────────────────────

/// Counter: engine operations. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "seatwise_operations_total";

/// Histogram: operation latency in seconds, lock wait included. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "seatwise_operation_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "seatwise_tenants_active";

/// Histogram: journal append + fsync duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "seatwise_journal_flush_duration_seconds";

/// Histogram: changes per journal entry.
pub const JOURNAL_BATCH_SIZE: &str = "seatwise_journal_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install a fmt subscriber filtered by `RUST_LOG`, defaulting to `info`.
/// Does nothing if the host already installed one.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn record_operation(op: &'static str, error: Option<&EngineError>, elapsed: Duration) {
    let status = error.map_or("ok", EngineError::kind);
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op).record(elapsed.as_secs_f64());
}
