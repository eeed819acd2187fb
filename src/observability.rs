use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "holdbook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "holdbook_http_request_duration_seconds";

/// Counter: requests cut off by the request timeout.
pub const HTTP_TIMEOUTS_TOTAL: &str = "holdbook_http_timeouts_total";

// ── Hold lifecycle ──────────────────────────────────────────────

/// Counter: hold rows created (one per date).
pub const HOLDS_CREATED_TOTAL: &str = "holdbook_holds_created_total";

/// Counter: CreateHold calls answered from the idempotency index.
pub const HOLDS_IDEMPOTENT_REPLAYS_TOTAL: &str = "holdbook_holds_idempotent_replays_total";

/// Counter: CreateHold calls refused. Labels: reason.
pub const HOLDS_REJECTED_TOTAL: &str = "holdbook_holds_rejected_total";

pub const HOLDS_CONFIRMED_TOTAL: &str = "holdbook_holds_confirmed_total";
pub const HOLDS_RELEASED_TOTAL: &str = "holdbook_holds_released_total";
pub const HOLDS_EXPIRED_TOTAL: &str = "holdbook_holds_expired_total";

/// Counter: capacity units returned to the pool. Labels: source (release, expire).
pub const CAPACITY_RESTORED_UNITS_TOTAL: &str = "holdbook_capacity_restored_units_total";

/// Counter: compensating actions executed. Labels: saga, step.
pub const COMPENSATIONS_TOTAL: &str = "holdbook_compensations_total";

/// Counter: compensating actions that themselves failed. Labels: saga, step.
pub const COMPENSATION_FAILURES_TOTAL: &str = "holdbook_compensation_failures_total";

// ── Sweeper ─────────────────────────────────────────────────────

/// Histogram: sweep run duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "holdbook_sweep_duration_seconds";

/// Histogram: overdue holds found per sweep.
pub const SWEEP_BATCH_SIZE: &str = "holdbook_sweep_batch_size";

/// Counter: holds the sweeper failed to expire.
pub const SWEEP_FAILURES_TOTAL: &str = "holdbook_sweep_failures_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "holdbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "holdbook_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "holdbook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
