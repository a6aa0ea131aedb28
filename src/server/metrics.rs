use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all analytics server metrics
const PREFIX: &str = "vortex_analytics";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Event Recording Metrics
    pub static ref EVENTS_RECORDED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_events_recorded_total"), "Recorded metric events"),
        &["metric_type"]
    ).expect("Failed to create events_recorded_total metric");

    // Query Cache Metrics
    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_cache_lookups_total"), "Query cache lookups by outcome"),
        &["operation", "result"]
    ).expect("Failed to create cache_lookups_total metric");

    // Curation Metrics
    pub static ref CURATION_FALLBACKS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_curation_fallbacks_total"), "Failed curation passes that fell back to engine ordering"),
        &["adapter"]
    ).expect("Failed to create curation_fallbacks_total metric");

    // Aggregation Metrics
    pub static ref AGGREGATION_OUTCOMES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_aggregation_outcomes_total"), "Daily aggregation outcomes per metric type"),
        &["metric_type", "outcome"]
    ).expect("Failed to create aggregation_outcomes_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(EVENTS_RECORDED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_LOOKUPS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CURATION_FALLBACKS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(AGGREGATION_OUTCOMES_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record one accepted event
pub fn record_event_recorded(metric_type: &str) {
    EVENTS_RECORDED_TOTAL
        .with_label_values(&[metric_type])
        .inc();
}

/// Record a query cache lookup outcome
pub fn record_cache_lookup(operation: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    CACHE_LOOKUPS_TOTAL
        .with_label_values(&[operation, result])
        .inc();
}

/// Record a curation pass that fell back to engine ordering
pub fn record_curation_fallback(adapter: &str) {
    CURATION_FALLBACKS_TOTAL.with_label_values(&[adapter]).inc();
}

/// Record the outcome of one metric type in a daily aggregation run
pub fn record_aggregation_outcome(metric_type: &str, outcome: &str) {
    AGGREGATION_OUTCOMES_TOTAL
        .with_label_values(&[metric_type, outcome])
        .inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics();

        record_http_request("GET", "/v1/analytics/rankings", 200, Duration::from_millis(5));
        record_event_recorded("artwork_view");
        record_cache_lookup("get_rankings", true);
        record_curation_fallback("noop");
        record_aggregation_outcome("artwork_sale", "inserted");

        let families = REGISTRY.gather();
        assert!(!families.is_empty());
    }
}
