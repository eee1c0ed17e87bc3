use std::net::SocketAddr;

use crate::error::BookingError;

// ── Request-driven metrics ──────────────────────────────────────

/// Counter: `book_room` attempts. Labels: status.
pub const BOOKINGS_TOTAL: &str = "bookings_book_room_total";

/// Counter: availability lookups. Labels: query.
pub const AVAILABILITY_QUERIES_TOTAL: &str = "bookings_availability_queries_total";

/// Histogram: core operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "bookings_operation_duration_seconds";

/// Counter: storage calls that hit the per-operation timeout. Labels: op.
pub const STORAGE_TIMEOUTS_TOTAL: &str = "bookings_storage_timeouts_total";

// ── Mail ────────────────────────────────────────────────────────

/// Counter: mail handed to the transport. Labels: status.
pub const MAIL_DELIVERIES_TOTAL: &str = "bookings_mail_deliveries_total";

/// Counter: mail dropped because the queue was full or closed.
pub const MAIL_DROPPED_TOTAL: &str = "bookings_mail_dropped_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookings_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (frames per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookings_wal_flush_batch_size";

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

/// Label for the outcome of a `book_room` call.
pub fn booking_status<T>(result: &Result<T, BookingError>) -> &'static str {
    match result {
        Ok(_) => "booked",
        Err(BookingError::RoomUnavailable { .. }) => "unavailable",
        Err(BookingError::InvalidRange { .. }) | Err(BookingError::LimitExceeded(_)) => "rejected",
        Err(BookingError::NotFound(_)) => "not_found",
        Err(BookingError::StorageTimeout { .. }) => "timeout",
        Err(BookingError::Storage(_)) => "storage_error",
    }
}
