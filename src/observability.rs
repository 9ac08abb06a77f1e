use std::net::SocketAddr;

use crate::engine::EngineError;

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservation create attempts. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "staybook_bookings_total";

/// Counter: reservation cancel attempts. Labels: outcome.
pub const CANCELLATIONS_TOTAL: &str = "staybook_cancellations_total";

/// Counter: stay delete attempts. Labels: outcome.
pub const STAY_DELETIONS_TOTAL: &str = "staybook_stay_deletions_total";

/// Counter: elapsed reservations dropped by retention.
pub const RESERVATIONS_PURGED_TOTAL: &str = "staybook_reservations_purged_total";

// ── Search ──────────────────────────────────────────────────────

/// Histogram: search latency in seconds.
pub const SEARCH_DURATION_SECONDS: &str = "staybook_search_duration_seconds";

/// Histogram: stays returned per search.
pub const SEARCH_RESULTS: &str = "staybook_search_results";

// ── Resources ───────────────────────────────────────────────────

/// Gauge: stays currently stored.
pub const STAYS_ACTIVE: &str = "staybook_stays_active";

/// Histogram: time spent waiting for a stay's write lock, in seconds.
pub const STAY_LOCK_WAIT_SECONDS: &str = "staybook_stay_lock_wait_seconds";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staybook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staybook_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install a `fmt` subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}

/// Metrics label for an operation result.
pub fn outcome_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.label(),
    }
}
