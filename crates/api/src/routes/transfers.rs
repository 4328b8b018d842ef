//! Transfer endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{AccountNumber, Money, TransferId};
use document_store::DocumentStore;
use serde::{Deserialize, Serialize};
use transfer::TransferRecord;

use super::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    pub amount_cents: i64,
    /// Lowers the configured attempt limit for this transfer. Values above
    /// the configured limit are capped to it.
    pub max_attempts: Option<u32>,
}

#[derive(Serialize)]
pub struct TransferResponse {
    pub transfer_id: String,
    pub from_balance_cents: i64,
    pub to_balance_cents: i64,
    pub attempts: u32,
    pub record: TransferRecord,
}

#[derive(Debug, Deserialize)]
pub struct TransferQuery {
    pub account: Option<String>,
}

#[derive(Serialize)]
pub struct TransferListResponse {
    pub transfers: Vec<TransferRecord>,
}

/// POST /transfers: move funds between two accounts.
#[tracing::instrument(skip(state, req), fields(from = %req.from, to = %req.to, amount = req.amount_cents))]
pub async fn create<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransferResponse>), ApiError> {
    let amount = Money::from_cents(req.amount_cents);
    let coordinator = &state.coordinator;
    let result = match req.max_attempts {
        Some(requested) => {
            let max_attempts = requested.min(coordinator.policy().max_attempts);
            coordinator
                .transfer_with_max_attempts(req.from, req.to, amount, max_attempts)
                .await?
        }
        None => coordinator.transfer(req.from, req.to, amount).await?,
    };

    Ok((
        StatusCode::CREATED,
        Json(TransferResponse {
            transfer_id: result.transfer_id.to_string(),
            from_balance_cents: result.from.balance.cents(),
            to_balance_cents: result.to.balance.cents(),
            attempts: result.attempts,
            record: result.record,
        }),
    ))
}

/// GET /transfers/{id}: one audit record.
#[tracing::instrument(skip(state))]
pub async fn get<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<TransferRecord>, ApiError> {
    let uuid = uuid::Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid transfer id: {e}")))?;
    let record = state
        .coordinator
        .ledger()
        .get(TransferId::from_uuid(uuid))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Transfer {id} not found")))?;

    Ok(Json(record))
}

/// GET /transfers?account=: audit records, optionally for one account.
#[tracing::instrument(skip(state))]
pub async fn list<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<TransferQuery>,
) -> Result<Json<TransferListResponse>, ApiError> {
    let ledger = state.coordinator.ledger();
    let transfers = match query.account {
        Some(account) => ledger.for_account(&AccountNumber::new(account)).await?,
        None => ledger.list().await?,
    };

    Ok(Json(TransferListResponse { transfers }))
}
