//! HTTP server for runner connections.
//!
//! # Endpoints
//!
//! - `GET /runner/{id}/ws` - WebSocket a dispatched runner connects back to
//! - `GET /health` - Liveness check with pending/running job counts

use std::sync::Arc;

use tower_http::trace::TraceLayer;

use crate::dispatch::{JobLauncher, Registry};

pub mod health;
pub mod runner_ws;

pub use health::health_handler;
pub use runner_ws::runner_ws_handler;

/// Shared application state, passed to handlers via axum's `State` extractor.
pub struct AppState<L> {
    registry: Arc<Registry<L>>,
}

// Manual impl: `L` itself need not be `Clone`.
impl<L> Clone for AppState<L> {
    fn clone(&self) -> Self {
        AppState {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<L: JobLauncher> AppState<L> {
    pub fn new(registry: Arc<Registry<L>>) -> Self {
        AppState { registry }
    }

    pub fn registry(&self) -> &Arc<Registry<L>> {
        &self.registry
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<L: JobLauncher>(app_state: AppState<L>) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/runner/{id}/ws", get(runner_ws_handler::<L>))
        .route("/health", get(health_handler::<L>))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
