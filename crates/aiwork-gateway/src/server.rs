use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use aiwork_core::config::GatewayConfig;
use aiwork_engine::{MetricsRegistry, Orchestrator};

use crate::routes;
use crate::state::AppState;

/// Build the REST router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/workflow", post(routes::submit_workflow))
        .route("/workflow/{id}", get(routes::get_workflow))
        .route("/workflow/{id}/task/{task_name}", get(routes::get_task))
        .route("/workflows", get(routes::list_workflows))
        .route("/metrics", get(routes::metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<MetricsRegistry>,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        orchestrator: Arc<Orchestrator>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            metrics,
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            orchestrator: self.orchestrator.clone(),
            state_manager: self.orchestrator.state_manager().clone(),
            metrics: self.metrics.clone(),
        })
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = router(self.state());

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
