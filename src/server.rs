//! # Server Configuration
//!
//! HTTP surface of the job runtime: service info, health and API docs.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;
use crate::queue::QueueSet;
use crate::worker::RuntimeStats;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub queues: QueueSet,
    pub stats: Arc<RuntimeStats>,
    pub failed_threshold: u64,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health::health))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}

/// Serves the router until `shutdown` fires, then drains open connections.
pub async fn run_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health::health,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::health::HealthReport,
            crate::handlers::health::HealthStatus,
            crate::handlers::health::QueueHealth,
        )
    ),
    info(
        title = "Pipeline Jobs API",
        description = "Health and status of the content pipeline job runtime",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
