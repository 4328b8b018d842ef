//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use document_store::StoreError;
use transfer::TransferError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Transfer or account operation error.
    Transfer(TransferError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Transfer(err) => transfer_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn transfer_error_to_response(err: TransferError) -> (StatusCode, String) {
    let status = match &err {
        TransferError::InvalidAmount(_) | TransferError::SameAccount(_) => StatusCode::BAD_REQUEST,
        TransferError::AccountNotFound(_) => StatusCode::NOT_FOUND,
        TransferError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        TransferError::CommitConflict(_)
        | TransferError::RetriesExhausted { .. }
        | TransferError::Store(StoreError::DuplicateKey { .. }) => StatusCode::CONFLICT,
        TransferError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "transfer infrastructure failure");
    }
    (status, err.to_string())
}

impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        ApiError::Transfer(err)
    }
}
