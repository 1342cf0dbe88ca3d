//! Operational probe for the consumer process. Not a product API.

use std::sync::Arc;

use anyhow::Result;
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    clients::health::HealthChecker,
    models::health::{HealthCheckResponse, HealthStatus},
};

pub fn router(health_checker: HealthChecker) -> Router {
    Router::new()
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(health_checker))
}

/// Serves `/health` on `0.0.0.0:<port>` until the process exits.
pub async fn run_api_server(port: u16, health_checker: HealthChecker) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;

    info!(port, "Health probe listening");

    axum::serve(listener, router(health_checker)).await?;

    Ok(())
}

/// Degraded still answers 200: the consumer keeps draining its queue.
pub fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn health(
    State(checker): State<Arc<HealthChecker>>,
) -> (StatusCode, Json<HealthCheckResponse>) {
    let report = checker.check_all().await;

    (status_code(report.status), Json(report))
}
