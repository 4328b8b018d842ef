//! Account endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{AccountNumber, Money};
use document_store::DocumentStore;
use serde::{Deserialize, Serialize};
use transfer::Account;

use super::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct OpenAccountRequest {
    pub account_number: String,
    #[serde(default)]
    pub initial_balance_cents: i64,
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub account_number: String,
    pub balance_cents: i64,
    pub created_at: String,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            account_number: account.account_number.to_string(),
            balance_cents: account.balance.cents(),
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct AccountListResponse {
    pub accounts: Vec<AccountResponse>,
    pub total_balance_cents: i64,
}

/// POST /accounts: open an account with an initial balance.
#[tracing::instrument(skip(state, req), fields(account = %req.account_number))]
pub async fn create<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<OpenAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let number = req.account_number.trim();
    if number.is_empty() {
        return Err(ApiError::BadRequest(
            "account_number must not be empty".to_string(),
        ));
    }

    let account = state
        .coordinator
        .accounts()
        .open_account(number, Money::from_cents(req.initial_balance_cents))
        .await?;

    Ok((StatusCode::CREATED, Json(account.into())))
}

/// GET /accounts/{number}: committed state of one account.
#[tracing::instrument(skip(state))]
pub async fn get<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(number): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .coordinator
        .accounts()
        .get(&AccountNumber::new(number.as_str()))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Account {number} not found")))?;

    Ok(Json(account.into()))
}

/// GET /accounts: every account plus the total balance.
#[tracing::instrument(skip(state))]
pub async fn list<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<AccountListResponse>, ApiError> {
    let accounts = state.coordinator.accounts();
    let total = accounts.total_balance().await?;
    let accounts = accounts.list().await?;

    Ok(Json(AccountListResponse {
        accounts: accounts.into_iter().map(AccountResponse::from).collect(),
        total_balance_cents: total.cents(),
    }))
}
