use std::sync::Arc;

use aiwork_engine::{MetricsRegistry, Orchestrator, StateManager};

/// Shared application state for axum handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub state_manager: Arc<StateManager>,
    pub metrics: Arc<MetricsRegistry>,
}
