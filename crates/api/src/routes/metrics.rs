//! Prometheus scrape endpoint.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::PrometheusHandle;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics: cart, checkout and HTTP counters in the Prometheus text format.
pub async fn render(State(handle): State<PrometheusHandle>) -> Response {
    // Upkeep drains histogram buckets before they are rendered.
    handle.run_upkeep();
    ([(CONTENT_TYPE, PROMETHEUS_TEXT)], handle.render()).into_response()
}
