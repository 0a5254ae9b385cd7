//! Health check endpoint for liveness checks.
//!
//! Also reports how many jobs are waiting for a runner and how many are
//! talking to one.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::dispatch::JobLauncher;

use super::AppState;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Health {
    pub status: &'static str,
    pub pending: usize,
    pub running: usize,
}

pub async fn health_handler<L: JobLauncher>(State(state): State<AppState<L>>) -> Json<Health> {
    let registry = state.registry();
    Json(Health {
        status: "ok",
        pending: registry.pending_count(),
        running: registry.running_count(),
    })
}
