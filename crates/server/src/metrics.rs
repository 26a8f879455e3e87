use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{MatchedPath, Request, State},
    http::header::CONTENT_LENGTH,
    middleware::Next,
    response::Response,
};
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

/// Metrics collects HTTP server metrics into a shared registry.
pub(crate) struct Metrics {
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    errors_total: CounterVec,
    network_traffic_bytes: CounterVec,
}

impl Metrics {
    pub(crate) fn register(registry: &Registry) -> prometheus::Result<Self> {
        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )?;
        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of errors"),
            &["source", "endpoint"],
        )?;
        let network_traffic_bytes = CounterVec::new(
            Opts::new("network_traffic_bytes", "Network traffic in bytes"),
            &["direction"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(network_traffic_bytes.clone()))?;

        Ok(Self {
            http_requests_total,
            http_request_duration_seconds,
            errors_total,
            network_traffic_bytes,
        })
    }

    fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    fn record_error(&self, source: &str, endpoint: &str) {
        self.errors_total.with_label_values(&[source, endpoint]).inc();
    }

    fn record_network_traffic(&self, direction: &str, bytes: usize) {
        self.network_traffic_bytes
            .with_label_values(&[direction])
            .inc_by(bytes as f64);
    }
}

/// Records count, latency and traffic of every routed request.
///
/// Requests are labelled by route template (`/order/{order_uid}`), never by
/// the concrete path.
pub(crate) async fn track(
    State(metrics): State<Arc<Metrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let incoming = content_length(req.headers());
    if incoming > 0 {
        metrics.record_network_traffic("in", incoming);
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16();

    metrics.record_request(&method, &endpoint, status, start.elapsed());
    if status >= 400 {
        metrics.record_error("http", &endpoint);
    }

    let outgoing = content_length(response.headers());
    if outgoing > 0 {
        metrics.record_network_traffic("out", outgoing);
    }

    response
}

fn content_length(headers: &axum::http::HeaderMap) -> usize {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0)
}
