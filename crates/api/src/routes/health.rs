//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use document_store::DocumentStore;
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub transfer_mode: &'static str,
    pub max_attempts: u32,
}

/// GET /health: returns system health and the active transfer settings.
pub async fn check<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        transfer_mode: state.coordinator.mode().as_str(),
        max_attempts: state.coordinator.policy().max_attempts,
    })
}
