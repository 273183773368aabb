use std::{io, sync::Arc};

use axum::{Json, Router, extract::State, routing::get};
use faultline_core::{ConnectionManager, HealthSnapshot};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Build the health router over the connection manager's snapshot.
pub fn health_router(manager: Arc<ConnectionManager>) -> Router {
    Router::new()
        .route("/health/clusters", get(clusters_health))
        .with_state(manager)
}

async fn clusters_health(
    State(manager): State<Arc<ConnectionManager>>,
) -> Json<HealthSnapshot> {
    Json(manager.health())
}

/// Serve the health endpoint until cancellation. A port of zero disables
/// the endpoint entirely; callers skip this function in that case.
pub async fn serve(
    port: u16,
    manager: Arc<ConnectionManager>,
    cancel: CancellationToken,
) -> Result<(), io::Error> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "health endpoint listening");

    axum::serve(listener, health_router(manager))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
