use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations executed. Labels: op, status.
pub const OPS_TOTAL: &str = "roomledger_ops_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OP_DURATION_SECONDS: &str = "roomledger_op_duration_seconds";

/// Counter: admin requests rejected by the shared-secret check.
pub const AUTH_FAILURES_TOTAL: &str = "roomledger_auth_failures_total";

// ── USE metrics (resource/consistency) ──────────────────────────

/// Counter: holds reclaimed by expiry sweeps.
pub const HOLDS_EXPIRED_TOTAL: &str = "roomledger_holds_expired_total";

/// Counter: floored decrements and missing ledger rows. Any nonzero value
/// means booking state and ledger counters disagreed somewhere.
pub const LEDGER_DRIFT_TOTAL: &str = "roomledger_ledger_drift_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomledger_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomledger_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if the
/// port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
