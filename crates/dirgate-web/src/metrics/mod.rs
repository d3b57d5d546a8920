//! Prometheus metrics for Dirgate
//!
//! Exposes metrics at `/metrics` endpoint in Prometheus format.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dirgate_core::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Metric names
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "dirgate_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "dirgate_http_request_duration_seconds";

    pub use dirgate_auth::audit::names::AUTH_ATTEMPTS_TOTAL;

    pub const UPTIME_SECONDS: &str = "dirgate_uptime_seconds";
    pub const INFO: &str = "dirgate_info";
}

#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
    start_time: Instant,
}

impl MetricsRecorder {
    /// Install the Prometheus recorder as the global `metrics` recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            dirgate_core::Error::InternalError(format!(
                "Failed to install Prometheus recorder: {}",
                e
            ))
        })?;

        gauge!(names::INFO, "version" => dirgate_core::VERSION).set(1.0);

        Ok(Self {
            handle,
            start_time: Instant::now(),
        })
    }

    /// A recorder that is not installed globally; samples sent through the
    /// `metrics` macros never reach it
    pub fn detached() -> Self {
        Self::with_handle(PrometheusBuilder::new().build_recorder().handle())
    }

    fn with_handle(handle: PrometheusHandle) -> Self {
        Self {
            handle,
            start_time: Instant::now(),
        }
    }

    pub fn render(&self) -> String {
        gauge!(names::UPTIME_SECONDS).set(self.start_time.elapsed().as_secs_f64());

        self.handle.render()
    }

    pub fn record_http_request(&self, method: &str, status: u16, duration_secs: f64) {
        let status_class = format!("{}xx", status / 100);

        counter!(
            names::HTTP_REQUESTS_TOTAL,
            "method" => method.to_string(),
            "status" => status.to_string(),
            "status_class" => status_class
        )
        .increment(1);

        histogram!(
            names::HTTP_REQUEST_DURATION_SECONDS,
            "method" => method.to_string()
        )
        .record(duration_secs);
    }
}

pub async fn metrics_middleware(
    State(metrics): State<Arc<MetricsRecorder>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();

    metrics.record_http_request(&method, status, duration);

    debug!(
        method = %method,
        path = %path,
        status = %status,
        duration_ms = %(duration * 1000.0),
        "Request completed"
    );

    response
}

pub async fn metrics_handler(State(metrics): State<Arc<MetricsRecorder>>) -> impl IntoResponse {
    let output = metrics.render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_requests_are_rendered() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let exporter = MetricsRecorder::with_handle(recorder.handle());

        metrics::with_local_recorder(&recorder, || {
            exporter.record_http_request("GET", 401, 0.002);
            exporter.record_http_request("GET", 401, 0.003);
        });

        let output = exporter.render();
        assert!(output.contains(names::HTTP_REQUESTS_TOTAL));
        assert!(output.contains("status=\"401\""));
        assert!(output.contains("status_class=\"4xx\""));
        assert!(output.contains(names::HTTP_REQUEST_DURATION_SECONDS));
    }

    #[test]
    fn test_detached_recorder_ignores_global_samples() {
        let metrics = MetricsRecorder::detached();
        metrics.record_http_request("GET", 200, 0.001);
        assert!(!metrics.render().contains(names::HTTP_REQUESTS_TOTAL));
    }
}
