use std::net::SocketAddr;

use crate::command::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: protocol requests received. Labels: op.
pub const REQUESTS_TOTAL: &str = "hallbook_requests_total";

/// Counter: booking operations. Labels: op, outcome.
pub const BOOKING_OPS_TOTAL: &str = "hallbook_booking_ops_total";

/// Histogram: booking operation latency in seconds. Labels: op.
pub const BOOKING_OP_DURATION_SECONDS: &str = "hallbook_booking_op_duration_seconds";

// ── Lock manager ────────────────────────────────────────────────

/// Histogram: time spent waiting for a granted span lock, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "hallbook_lock_wait_seconds";

/// Counter: span lock acquisitions that timed out.
pub const LOCK_TIMEOUTS_TOTAL: &str = "hallbook_lock_timeouts_total";

/// Gauge: span locks currently held across all halls.
pub const LOCKS_HELD: &str = "hallbook_locks_held";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "hallbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "hallbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "hallbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hallbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "hallbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Halls => "halls",
        Command::Create { .. } => "create",
        Command::CreateBatch { .. } => "create_batch",
        Command::Update { .. } => "update",
        Command::Cancel { .. } => "cancel",
        Command::List { .. } => "list",
        Command::AvailableHalls { .. } => "available_halls",
        Command::Availability { .. } => "availability",
        Command::Clear => "clear",
    }
}
