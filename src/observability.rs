use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking proposals received (all outcomes).
pub const PROPOSALS_TOTAL: &str = "cadenza_proposals_total";

/// Counter: proposals committed.
pub const COMMITS_TOTAL: &str = "cadenza_commits_total";

/// Counter: proposals rejected with a resource conflict.
pub const CONFLICTS_TOTAL: &str = "cadenza_conflicts_total";

/// Counter: bookings cancelled.
pub const CANCELLATIONS_TOTAL: &str = "cadenza_cancellations_total";

/// Counter: lock acquisitions that timed out (`Busy` returned).
pub const LOCK_TIMEOUTS_TOTAL: &str = "cadenza_lock_timeouts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "cadenza_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "cadenza_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if `port` is
/// None; the embedding process decides whether metrics are exposed.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
