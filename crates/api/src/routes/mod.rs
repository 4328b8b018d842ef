//! HTTP route handlers.

pub mod accounts;
pub mod health;
pub mod metrics;
pub mod transfers;

use document_store::DocumentStore;
use transfer::TransferCoordinator;

/// Shared application state accessible from all handlers.
pub struct AppState<S: DocumentStore> {
    pub coordinator: TransferCoordinator<S>,
}
