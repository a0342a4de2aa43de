use crate::error::{ApiError, Result};
use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// `path` label for requests that matched no route
const UNMATCHED_ROUTE: &str = "unmatched";

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Create a new metrics service and install it as the global recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            ApiError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        // Request metrics
        describe_counter!(
            "ledger_requests_total",
            "Total number of HTTP requests received"
        );
        describe_histogram!(
            "ledger_request_duration_seconds",
            "HTTP request latencies in seconds"
        );

        // Rate limiting metrics
        describe_counter!(
            "ledger_rate_limit_admitted_total",
            "Total number of requests admitted by the rate limiter"
        );
        describe_counter!(
            "ledger_rate_limit_exceeded_total",
            "Total number of requests rejected due to rate limiting"
        );
        describe_gauge!(
            "ledger_rate_limit_tracked_clients",
            "Number of client identities with a live rate limit window"
        );

        // Cache metrics
        describe_counter!("ledger_cache_hits_total", "Total number of cache hits");
        describe_counter!("ledger_cache_misses_total", "Total number of cache misses");
        describe_counter!(
            "ledger_cache_coalesced_total",
            "Cache misses that joined a computation already in flight"
        );
        describe_counter!(
            "ledger_cache_compute_failures_total",
            "Cache computations that failed and were not stored"
        );
        describe_counter!(
            "ledger_store_evictions_total",
            "Entries evicted from keyed stores, by reason"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    let metrics = service.render();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics,
    )
}

/// Middleware recording request count and latency
pub async fn track_metrics(request: Request, next: Next) -> Response<Body> {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = route_label(&request);

    let response = next.run(request).await;

    record_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}

/// Record a request metric
pub fn record_request(method: &str, path: &str, status: u16, duration: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!("ledger_requests_total", &labels).increment(1);
    histogram!("ledger_request_duration_seconds", &labels).record(duration);
}

/// Record an admitted request
pub fn record_rate_limit_admitted() {
    counter!("ledger_rate_limit_admitted_total").increment(1);
}

/// Record rate limit exceeded
pub fn record_rate_limit_exceeded() {
    counter!("ledger_rate_limit_exceeded_total").increment(1);
}

/// Record the number of tracked client windows
pub fn record_tracked_clients(count: usize) {
    gauge!("ledger_rate_limit_tracked_clients").set(count as f64);
}

/// Record a cache hit
pub fn record_cache_hit(cache: &'static str) {
    counter!("ledger_cache_hits_total", "cache" => cache).increment(1);
}

/// Record a cache miss that starts a new computation
pub fn record_cache_miss(cache: &'static str) {
    counter!("ledger_cache_misses_total", "cache" => cache).increment(1);
}

/// Record a cache miss that joined an in-flight computation
pub fn record_cache_coalesced(cache: &'static str) {
    counter!("ledger_cache_coalesced_total", "cache" => cache).increment(1);
}

/// Record a failed cache computation
pub fn record_cache_compute_failure(cache: &'static str) {
    counter!("ledger_cache_compute_failures_total", "cache" => cache).increment(1);
}

/// Record entries evicted from a keyed store
pub fn record_store_eviction(store: &'static str, reason: &'static str, count: u64) {
    counter!("ledger_store_evictions_total", "store" => store, "reason" => reason)
        .increment(count);
}

/// Route template used as the `path` label. Requests that matched no route
/// share one label so arbitrary URLs cannot grow the label set.
fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
}
