//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return the render handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "playout_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "playout_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "playout_http_requests_in_flight";
    pub const PREPARE_REQUESTS_TOTAL: &str = "playout_api_prepare_requests_total";
    pub const TRANSITION_EDITS_TOTAL: &str = "playout_api_transition_edits_total";
}

pub fn record_http_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status.to_string()),
    ];
    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// `outcome` is `accepted` or `rejected`.
pub fn record_prepare_request(outcome: &'static str) {
    counter!(names::PREPARE_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

/// `op` is `create`, `update` or `delete`.
pub fn record_transition_edit(op: &'static str) {
    counter!(names::TRANSITION_EDITS_TOTAL, "op" => op).increment(1);
}

/// Metrics middleware for HTTP requests. Requests are labelled with the
/// matched route template so ids do not explode label cardinality.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(&method, &route, response.status().as_u16(), start.elapsed().as_secs_f64());
    response
}
