//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Total number of successful rotation reconciles
    pub static ref ROTATION_RECONCILES: CounterVec = register_counter_vec!(
        "secrets_rotation_reconcile_total",
        "Total number of rotation reconciles",
        &["provider", "rotated"]
    ).unwrap();

    /// Total number of failed rotation reconciles
    pub static ref ROTATION_RECONCILE_ERRORS: CounterVec = register_counter_vec!(
        "secrets_rotation_reconcile_errors_total",
        "Total number of rotation reconcile errors",
        &["provider", "error_type", "rotated"]
    ).unwrap();

    /// Rotation reconcile duration histogram
    pub static ref ROTATION_RECONCILE_DURATION: Histogram = register_histogram!(
        "secrets_rotation_reconcile_duration_seconds",
        "Duration of successful rotation reconciles in seconds",
        vec![0.1, 0.2, 0.3, 0.4, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 5.0, 10.0, 15.0, 30.0]
    ).unwrap();

    /// Keys waiting in the rotation queue
    pub static ref ROTATION_QUEUE_DEPTH: Gauge = register_gauge!(
        "secrets_rotation_queue_depth",
        "Number of pod statuses waiting in the rotation queue"
    ).unwrap();

    /// Controller health (1 = healthy, 0 = unhealthy)
    pub static ref CONTROLLER_HEALTH: Gauge = register_gauge!(
        "secrets_rotation_controller_health",
        "Controller health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

fn rotated_label(rotated: bool) -> &'static str {
    if rotated {
        "true"
    } else {
        "false"
    }
}

/// Record a successful reconcile
pub fn record_rotation(provider: &str, rotated: bool, elapsed: Duration) {
    ROTATION_RECONCILES
        .with_label_values(&[provider, rotated_label(rotated)])
        .inc();
    ROTATION_RECONCILE_DURATION.observe(elapsed.as_secs_f64());
}

/// Record a failed reconcile classified by `error_type`
pub fn record_rotation_error(provider: &str, error_type: &str, rotated: bool) {
    ROTATION_RECONCILE_ERRORS
        .with_label_values(&[provider, error_type, rotated_label(rotated)])
        .inc();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    CONTROLLER_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => health_response(),
        "/readyz" | "/ready" => ready_response(),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", encoder.format_type())
        .body(Full::new(Bytes::from(buffer)))
        .unwrap()
}

/// Healthy while the health gauge is set
fn health_response() -> Response<Full<Bytes>> {
    if CONTROLLER_HEALTH.get() > 0.0 {
        text_response(StatusCode::OK, "ok")
    } else {
        text_response(StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}

fn ready_response() -> Response<Full<Bytes>> {
    text_response(StatusCode::OK, "ok")
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_rotation_is_counted_by_provider_and_update() {
        let before = ROTATION_RECONCILES
            .with_label_values(&["metrics-test", "true"])
            .get();
        record_rotation("metrics-test", true, Duration::from_millis(20));
        let after = ROTATION_RECONCILES
            .with_label_values(&["metrics-test", "true"])
            .get();
        assert_eq!(after - before, 1.0);
    }

    #[test]
    fn errors_are_counted_by_reason() {
        record_rotation_error("metrics-test", "PodNotFound", false);
        let count = ROTATION_RECONCILE_ERRORS
            .with_label_values(&["metrics-test", "PodNotFound", "false"])
            .get();
        assert!(count >= 1.0);
    }

    #[test]
    fn metrics_endpoint_encodes_registered_families() {
        record_rotation("metrics-endpoint", false, Duration::from_millis(1));
        let response = metrics_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
