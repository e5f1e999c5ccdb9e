use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "lessonbook_http_requests_total";

/// Histogram: HTTP handler latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "lessonbook_http_request_duration_seconds";

/// Counter: bookings inserted.
pub const BOOKINGS_CREATED_TOTAL: &str = "lessonbook_bookings_created_total";

/// Counter: booking requests refused by write-time re-validation.
pub const BOOKINGS_REJECTED_TOTAL: &str = "lessonbook_bookings_rejected_total";

/// Counter: lifecycle events applied. Labels: event, outcome (changed/noop).
pub const TRANSITIONS_TOTAL: &str = "lessonbook_transitions_total";

/// Counter: webhook deliveries. Labels: type, outcome.
pub const WEBHOOK_EVENTS_TOTAL: &str = "lessonbook_webhook_events_total";

/// Counter: best-effort side effects that failed. Labels: effect.
pub const SIDE_EFFECT_FAILURES_TOTAL: &str = "lessonbook_side_effect_failures_total";

// ── Status sync ─────────────────────────────────────────────────

/// Histogram: duration of one status sync pass in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "lessonbook_sweep_duration_seconds";

/// Counter: bookings transitioned by the status sync.
pub const SWEEP_TRANSITIONS_TOTAL: &str = "lessonbook_sweep_transitions_total";

/// Counter: bookings skipped by the status sync because of an error.
pub const SWEEP_BOOKINGS_FAILED_TOTAL: &str = "lessonbook_sweep_bookings_failed_total";

/// Counter: expired holds removed.
pub const HOLDS_PURGED_TOTAL: &str = "lessonbook_holds_purged_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_SECONDS: &str = "lessonbook_journal_flush_seconds";

/// Histogram: journal group-commit batch size (entries per flush).
pub const JOURNAL_BATCH_SIZE: &str = "lessonbook_journal_batch_size";

/// Counter: journal compactions.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "lessonbook_journal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
/// A failed install is logged; the service runs without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}
