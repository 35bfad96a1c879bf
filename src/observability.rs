use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "shoptime_queries_total";

/// Histogram: command latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "shoptime_query_duration_seconds";

/// Counter: series instances materialized (initial + rolling window).
pub const SERIES_INSTANCES_TOTAL: &str = "shoptime_series_instances_total";

/// Counter: bookings moved to completed by the sweeper.
pub const BOOKINGS_COMPLETED_TOTAL: &str = "shoptime_bookings_completed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "shoptime_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "shoptime_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "shoptime_connections_rejected_total";

/// Gauge: number of active sites (loaded engines).
pub const SITES_ACTIVE: &str = "shoptime_sites_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "shoptime_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "shoptime_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if
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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateResource { .. } => "create_resource",
        Command::UpdateResource { .. } => "update_resource",
        Command::DeleteResource { .. } => "delete_resource",
        Command::AddHours { .. } => "add_hours",
        Command::RemoveHours { .. } => "remove_hours",
        Command::RequestBooking { .. } => "request_booking",
        Command::EditBooking { .. } => "edit_booking",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::CreateSeries { .. } => "create_series",
        Command::SetSeriesStatus { .. } => "set_series_status",
        Command::SelectResources => "select_resources",
        Command::SelectHours { .. } => "select_hours",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectSeries { .. } => "select_series",
        Command::SelectSkips { .. } => "select_skips",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectAudit { .. } => "select_audit",
        Command::Undo { .. } => "undo",
    }
}
