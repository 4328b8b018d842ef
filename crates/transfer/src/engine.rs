//! Single-attempt transfer execution.

use common::{AccountNumber, Money, TransferId};
use document_store::DocumentStore;
use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountStore};
use crate::error::{Result, TransferError};
use crate::ledger::{AuditLedger, TransferRecord};
use crate::session::TransactionSession;

/// How an attempt batches its writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Debit, credit and audit as three separate writes.
    #[default]
    Standard,
    /// Debit and credit as one grouped multi-document write, then audit.
    Bulk,
    /// Debit and credit in the outer transaction, audit in a nested scope
    /// that commits only with the outer one.
    Nested,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Standard => "standard",
            TransferMode::Bulk => "bulk",
            TransferMode::Nested => "nested",
        }
    }
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(TransferMode::Standard),
            "bulk" => Ok(TransferMode::Bulk),
            "nested" => Ok(TransferMode::Nested),
            other => Err(format!("unknown transfer mode '{other}'")),
        }
    }
}

/// One execution of the transfer logic. Lives for a single coordinator
/// iteration; the transfer ID is shared by every attempt of a transfer.
#[derive(Debug, Clone)]
pub struct TransferAttempt {
    pub transfer_id: TransferId,
    pub from: AccountNumber,
    pub to: AccountNumber,
    pub amount: Money,
    pub attempt_number: u32,
}

impl TransferAttempt {
    pub fn new(
        transfer_id: TransferId,
        from: AccountNumber,
        to: AccountNumber,
        amount: Money,
        attempt_number: u32,
    ) -> Self {
        Self {
            transfer_id,
            from,
            to,
            amount,
            attempt_number,
        }
    }
}

/// Outcome of a committed transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferResult {
    pub transfer_id: TransferId,
    /// Source account after the debit.
    pub from: Account,
    /// Destination account after the credit.
    pub to: Account,
    pub record: TransferRecord,
    /// Number of attempts it took, including the committed one.
    pub attempts: u32,
}

/// Checks the request-level preconditions of a transfer.
pub fn validate_request(from: &AccountNumber, to: &AccountNumber, amount: Money) -> Result<()> {
    if !amount.is_positive() {
        return Err(TransferError::InvalidAmount(amount));
    }
    if from == to {
        return Err(TransferError::SameAccount(from.clone()));
    }
    Ok(())
}

/// Executes the debit, funds check, credit and audit write of one attempt.
///
/// All writes go through the caller's session. The engine never commits or
/// aborts; on error the caller aborts the session, so nothing written here
/// becomes visible.
#[derive(Clone)]
pub struct TransferEngine<S> {
    accounts: AccountStore<S>,
    ledger: AuditLedger<S>,
    mode: TransferMode,
}

impl<S: DocumentStore + Clone> TransferEngine<S> {
    pub fn new(store: S, mode: TransferMode) -> Self {
        Self {
            accounts: AccountStore::new(store.clone()),
            ledger: AuditLedger::new(store),
            mode,
        }
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    #[tracing::instrument(
        skip(self, attempt, session),
        fields(
            transfer_id = %attempt.transfer_id,
            attempt = attempt.attempt_number,
            mode = %self.mode,
        )
    )]
    pub async fn execute(
        &self,
        attempt: &TransferAttempt,
        session: &mut TransactionSession<'_, S>,
    ) -> Result<TransferResult> {
        validate_request(&attempt.from, &attempt.to, attempt.amount)?;

        let (from, to) = match self.mode {
            TransferMode::Standard | TransferMode::Nested => {
                self.move_funds(attempt, session).await?
            }
            TransferMode::Bulk => self.move_funds_grouped(attempt, session).await?,
        };

        let record = TransferRecord::completed(attempt, self.mode);
        if self.mode == TransferMode::Nested {
            let mut inner = session.nested()?;
            self.ledger.append(inner.active()?, &record).await?;
            inner.finish();
        } else {
            self.ledger.append(session.active()?, &record).await?;
        }

        tracing::debug!(
            from_balance = %from.balance,
            to_balance = %to.balance,
            "transfer staged"
        );

        Ok(TransferResult {
            transfer_id: attempt.transfer_id,
            from,
            to,
            record,
            attempts: attempt.attempt_number,
        })
    }

    async fn move_funds(
        &self,
        attempt: &TransferAttempt,
        session: &mut TransactionSession<'_, S>,
    ) -> Result<(Account, Account)> {
        let from = self
            .accounts
            .debit(session.active()?, &attempt.from, attempt.amount)
            .await?
            .ok_or_else(|| TransferError::AccountNotFound(attempt.from.clone()))?;
        check_funds(attempt, &from)?;

        let to = self
            .accounts
            .credit(session.active()?, &attempt.to, attempt.amount)
            .await?
            .ok_or_else(|| TransferError::AccountNotFound(attempt.to.clone()))?;

        Ok((from, to))
    }

    async fn move_funds_grouped(
        &self,
        attempt: &TransferAttempt,
        session: &mut TransactionSession<'_, S>,
    ) -> Result<(Account, Account)> {
        let legs = [
            (attempt.from.clone(), -attempt.amount),
            (attempt.to.clone(), attempt.amount),
        ];
        let mut updated = self
            .accounts
            .apply_legs(session.active()?, &legs)
            .await?
            .into_iter();

        let from = updated
            .next()
            .flatten()
            .ok_or_else(|| TransferError::AccountNotFound(attempt.from.clone()))?;
        check_funds(attempt, &from)?;
        let to = updated
            .next()
            .flatten()
            .ok_or_else(|| TransferError::AccountNotFound(attempt.to.clone()))?;

        Ok((from, to))
    }
}

fn check_funds(attempt: &TransferAttempt, debited: &Account) -> Result<()> {
    if debited.balance.is_negative() {
        return Err(TransferError::InsufficientFunds {
            account: attempt.from.clone(),
            balance: debited
                .balance
                .checked_add(attempt.amount)
                .unwrap_or(debited.balance),
            requested: attempt.amount,
        });
    }
    Ok(())
}
