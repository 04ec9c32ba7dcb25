use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "innkeep_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "innkeep_query_duration_seconds";

// ── Connections and WAL ─────────────────────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "innkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "innkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeep_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservations whose payment was confirmed.
pub const STAYS_CONFIRMED_TOTAL: &str = "innkeep_stays_confirmed_total";

/// Counter: checkouts or confirmations refused because the dates were taken.
pub const OVERLAP_REJECTIONS_TOTAL: &str = "innkeep_overlap_rejections_total";

/// Counter: pending checkouts dropped by the reaper.
pub const PENDING_EXPIRED_TOTAL: &str = "innkeep_pending_expired_total";

/// Counter: image deletes that failed after a hotel or room was removed.
pub const IMAGE_DELETE_FAILURES_TOTAL: &str = "innkeep_image_delete_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
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
        Command::InsertHotel { .. } => "insert_hotel",
        Command::UpdateHotel { .. } => "update_hotel",
        Command::DeleteHotel { .. } => "delete_hotel",
        Command::SelectHotels { .. } => "select_hotels",
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::SelectRooms { .. } => "select_rooms",
        Command::InsertReservation { .. } => "start_checkout",
        Command::ConfirmPayment { .. } => "confirm_payment",
        Command::DeleteReservation { .. } => "release_checkout",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectBookedDates { .. } => "select_booked_dates",
        Command::SelectQuote { .. } => "select_quote",
        Command::DeleteImage { .. } => "delete_image",
    }
}
