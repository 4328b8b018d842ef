//! HTTP API server for the funds-transfer system.
//!
//! Exposes account and transfer endpoints over a [`TransferCoordinator`],
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use document_store::DocumentStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use transfer::{RetryPolicy, TransferCoordinator, TransferMode};

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: DocumentStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/accounts", post(routes::accounts::create::<S>))
        .route("/accounts", get(routes::accounts::list::<S>))
        .route("/accounts/{number}", get(routes::accounts::get::<S>))
        .route("/transfers", post(routes::transfers::create::<S>))
        .route("/transfers", get(routes::transfers::list::<S>))
        .route("/transfers/{id}", get(routes::transfers::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state around a document store.
pub fn create_state<S: DocumentStore + Clone + 'static>(
    store: S,
    policy: RetryPolicy,
    mode: TransferMode,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        coordinator: TransferCoordinator::with_mode(store, policy, mode),
    })
}
