use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Upper bounds for `delivery_processing_duration_seconds`. A message's processing time covers
/// every adapter call and backoff sleep for all of its recipients, so the tail runs to minutes.
const PROCESSING_SECONDS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

/// Serve the worker's operational endpoints (`/`, `/_liveness` and `/metrics`) until the
/// listener fails. Runs beside the consume loop and never stops it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await
}

fn recorder_builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets(PROCESSING_SECONDS)
}

/// Install the process-wide Prometheus recorder. The returned handle renders `/metrics`.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    recorder_builder()?.install_recorder()
}

/// The route template when the router matched one, so `/metrics?x=1` and `/metrics` share labels.
fn route_label(req: &Request<Body>) -> String {
    match req.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    }
}

/// Counts and times requests to the operational endpoints, labelled by method, route and status.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let route = route_label(&req);
    let method = req.method().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", route),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("delivery_http_requests_total", &labels).increment(1);
    metrics::histogram!("delivery_http_request_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());

    response
}
