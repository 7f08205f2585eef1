//! Metrics support for the server

use iroh_metrics::{Counter, MetricsGroup};

/// Metrics for the sync storage server.
#[derive(Debug, Default, MetricsGroup)]
#[metrics(name = "syncstorage")]
pub struct Metrics {
    /// Number of HTTP requests
    pub http_requests: Counter,
    /// Number of HTTP requests with a 2xx status code
    pub http_requests_success: Counter,
    /// Number of HTTP requests with a non-2xx status code
    pub http_requests_error: Counter,
    /// Total duration of all HTTP requests in milliseconds
    pub http_requests_duration_ms: Counter,
    /// User stores opened by the pools
    pub stores_opened: Counter,
    /// User stores evicted from the pools
    pub stores_evicted: Counter,
    /// BSO writes committed (PUT and each batched POST item)
    pub bsos_written: Counter,
    /// BSO deletions committed
    pub bsos_deleted: Counter,
    /// Expired records removed by purge sweeps
    pub records_purged: Counter,
}
