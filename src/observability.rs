use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, method, status.
pub const REQUESTS_TOTAL: &str = "coachbook_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route, method.
pub const REQUEST_DURATION_SECONDS: &str = "coachbook_request_duration_seconds";

/// Counter: bookings admitted.
pub const BOOKINGS_CREATED_TOTAL: &str = "coachbook_bookings_created_total";

/// Counter: booking requests rejected. Labels: rule.
pub const BOOKING_REJECTIONS_TOTAL: &str = "coachbook_booking_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: coaches with a booking ledger.
pub const COACHES_TRACKED: &str = "coachbook_coaches_tracked";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "coachbook_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "coachbook_journal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Status label for request metrics: "ok", "client_error" or "server_error".
pub fn status_label(status: u16) -> &'static str {
    match status {
        500.. => "server_error",
        400..=499 => "client_error",
        _ => "ok",
    }
}
