//! Prometheus metrics for thumbforge.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides an axum middleware for HTTP RED
//! metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "thumbforge_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "thumbforge_http_request_duration_seconds";

/// Pipeline runs by outcome (counter). Labels: outcome, stage on failure.
pub const THUMBNAILS_TOTAL: &str = "thumbforge_thumbnails_total";

/// Pipeline stage duration in seconds (histogram). Labels: stage.
pub const STAGE_DURATION_SECONDS: &str = "thumbforge_stage_duration_seconds";

/// Follow notifications by result (counter). Labels: result.
pub const NOTIFICATIONS_TOTAL: &str = "thumbforge_notifications_total";

/// Device registrations removed after stale-token errors (counter).
pub const TOKENS_REMOVED_TOTAL: &str = "thumbforge_tokens_removed_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder. Idempotent, so tests may call it
/// repeatedly.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(THUMBNAILS_TOTAL, "Thumbnail pipeline runs by outcome");
    describe_histogram!(
        STAGE_DURATION_SECONDS,
        "Thumbnail pipeline stage duration in seconds"
    );
    describe_counter!(NOTIFICATIONS_TOTAL, "Follow notifications by result");
    describe_counter!(
        TOKENS_REMOVED_TOTAL,
        "Device registrations removed after stale-token errors"
    );
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// `/metrics` itself is not instrumented.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize a request path to a route template for metric labels.
///
/// - `/events/object-finalized` -> `/events/object-finalized`
/// - `/objects/photos/images/cat.png` -> `/objects/{bucket}/{path}`
/// - anything unknown -> `/{other}`
fn normalize_path(path: &str) -> String {
    match path {
        "/health" | "/openapi.json" | "/metrics" | "/events/object-finalized"
        | "/events/follow-created" => path.to_string(),
        _ if path.starts_with("/objects/") => "/objects/{bucket}/{path}".to_string(),
        _ => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics`: Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
