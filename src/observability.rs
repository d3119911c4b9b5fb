use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "parkway_queries_total";

/// Histogram: command latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "parkway_query_duration_seconds";

// ── Lot metrics ─────────────────────────────────────────────────

/// Counter: arrivals. Labels: outcome (parked, queued).
pub const ARRIVALS_TOTAL: &str = "parkway_arrivals_total";

/// Counter: departures billed.
pub const DEPARTURES_TOTAL: &str = "parkway_departures_total";

/// Counter: currency units billed.
pub const REVENUE_TOTAL: &str = "parkway_revenue_total";

/// Counter: drain attempts that popped a vehicle. Labels: outcome (seated, no_free_slot, failed).
pub const DRAINS_TOTAL: &str = "parkway_drains_total";

/// Gauge: free slots.
pub const SLOTS_FREE: &str = "parkway_slots_free";

/// Gauge: vehicles waiting.
pub const QUEUE_DEPTH: &str = "parkway_queue_depth";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "parkway_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "parkway_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "parkway_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "parkway_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "parkway_wal_flush_batch_size";

/// Install the Prometheus exporter. No-op when `addr` is None.
pub fn init(addr: Option<SocketAddr>) -> Result<(), BuildError> {
    let Some(addr) = addr else { return Ok(()) };
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InitializeSlots { .. } => "initialize_slots",
        Command::Arrive { .. } => "arrive",
        Command::Depart { .. } => "depart",
        Command::SelectStatus => "select_status",
        Command::SelectSlots => "select_slots",
        Command::SelectQueue => "select_queue",
        Command::SelectSessions { .. } => "select_sessions",
        Command::SelectVehicle { .. } => "select_vehicle",
    }
}
