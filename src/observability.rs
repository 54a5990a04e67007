use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "fieldslot_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "fieldslot_query_duration_seconds";

/// Counter: reservation and manual booking attempts. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "fieldslot_reservations_total";

/// Counter: processed payment notifications. Labels: outcome.
pub const SETTLEMENTS_TOTAL: &str = "fieldslot_settlements_total";

/// Counter: payments captured for a slot someone else holds. Each one needs a refund.
pub const REFUND_REVIEWS_TOTAL: &str = "fieldslot_refund_reviews_total";

/// Counter: pending reservations failed by the expiry reaper.
pub const REAPED_TOTAL: &str = "fieldslot_reaped_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "fieldslot_connections_active";
pub const CONNECTIONS_TOTAL: &str = "fieldslot_connections_total";

/// Counter: connections turned away at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "fieldslot_connections_rejected_total";

/// Gauge: venues with a loaded engine.
pub const VENUES_ACTIVE: &str = "fieldslot_venues_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "fieldslot_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fieldslot_wal_flush_duration_seconds";

/// Histogram: events per WAL group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "fieldslot_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None; a failed
/// install is logged and the server runs without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on {addr}: {e}"),
    }
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertField { .. } => "insert_field",
        Command::DeactivateField { .. } => "deactivate_field",
        Command::SelectFields => "select_fields",
        Command::ReserveSlots { .. } => "reserve_slots",
        Command::ManualBooking { .. } => "manual_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::CreatePaymentSession { .. } => "create_payment_session",
        Command::AttachPaymentToken { .. } => "attach_payment_token",
        Command::PaymentNotification { .. } => "payment_notification",
        Command::SelectBookings { .. } => "select_bookings",
        Command::CountBookings { .. } => "count_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectRevenue { .. } => "select_revenue",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
