//! Server crate provides HTTP server functionality.
//!
//! This module exposes order submission and lookup, the free-form message
//! demo endpoints, health and prometheus metrics. Handlers only translate
//! between HTTP and the service layer; [`ServiceError`] kinds map to status
//! codes in one place.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use prometheus::Registry;
use serde::Deserialize;
use serde_json::json;
use service::{MessageService, OrderService, ServiceError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod metrics;

use metrics::Metrics;

/// Server represents an HTTP server for working with orders.
pub struct Server {
    port: u16,
    state: AppState,
}

/// Application state shared between request handlers
#[derive(Clone)]
struct AppState {
    orders: Arc<dyn OrderService>,
    messages: Arc<dyn MessageService>,
    metrics: Arc<Metrics>,
    registry: Registry,
}

impl Server {
    /// Creates a new Server instance.
    ///
    /// HTTP metrics are registered in `registry`, which `/metrics` exposes
    /// together with anything else registered there.
    ///
    /// # Errors
    /// Fails if the HTTP metrics are already registered in `registry`.
    pub fn new(
        port: u16,
        orders: Arc<dyn OrderService>,
        messages: Arc<dyn MessageService>,
        registry: Registry,
    ) -> Result<Self> {
        info!("Initializing HTTP server on port {}", port);
        let metrics = Metrics::register(&registry).context("Failed to register HTTP metrics")?;

        Ok(Self {
            port,
            state: AppState {
                orders,
                messages,
                metrics: Arc::new(metrics),
                registry,
            },
        })
    }

    /// Serves until `shutdown` is cancelled, then drains in-flight requests.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .with_context(|| format!("Failed to bind to port {}", self.port))?;

        info!("HTTP server listening on port {}", self.port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .context("Server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/publish", get(handle_publish))
            .route("/read", get(handle_read))
            .route("/order", post(handle_submit_order))
            .route("/order/", get(handle_missing_order_id))
            .route("/order/{order_uid}", get(handle_get_order))
            .route("/orders", get(handle_list_orders))
            .route("/health", get(handle_health))
            .route("/metrics", get(handle_metrics))
            .layer(axum::middleware::from_fn_with_state(
                self.state.metrics.clone(),
                metrics::track,
            ))
            .with_state(self.state.clone())
    }
}

/// [`ServiceError`] as an HTTP response.
struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::Unavailable(_) | ServiceError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct PublishParams {
    message: Option<String>,
}

async fn handle_publish(
    State(state): State<AppState>,
    Query(params): Query<PublishParams>,
) -> Result<String, ApiError> {
    let message = params.message.unwrap_or_default();
    state.messages.publish_message(&message).await?;
    Ok(format!("Published message: {message}"))
}

async fn handle_read(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.messages.read_message().await? {
        Some(message) => Ok(format!("Received a message: {message}").into_response()),
        None => Ok((StatusCode::GATEWAY_TIMEOUT, "No messages available").into_response()),
    }
}

async fn handle_submit_order(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let order_uid = state.orders.submit_order(&body).await?;
    Ok(Json(json!({ "order_uid": order_uid })))
}

async fn handle_get_order(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
) -> Result<Json<model::Order>, ApiError> {
    info!("Received order request for ID: {}", order_uid);
    let order = state
        .orders
        .get_order(&order_uid)
        .await
        .inspect_err(|e| {
            if *e == ServiceError::NotFound {
                warn!("Order not found: {}", order_uid);
            }
        })?;
    Ok(Json(order))
}

/// `/order/` never reaches the `{order_uid}` route.
async fn handle_missing_order_id() -> ApiError {
    warn!("Order ID is missing in request");
    ApiError(ServiceError::Invalid("order id is required".into()))
}

async fn handle_list_orders(
    State(state): State<AppState>,
) -> Result<Json<Vec<model::Order>>, ApiError> {
    Ok(Json(state.orders.list_orders().await?))
}

async fn handle_health() -> &'static str {
    "OK"
}

async fn handle_metrics(State(state): State<AppState>) -> Response {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.registry.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match String::from_utf8(buffer) {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to convert metrics to UTF-8: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Invalid metrics data").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ServiceError::Invalid("bad".into()), StatusCode::BAD_REQUEST),
            (ServiceError::NotFound, StatusCode::NOT_FOUND),
            (
                ServiceError::Unavailable("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ServiceError::Unexpected("corrupt".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }
}
