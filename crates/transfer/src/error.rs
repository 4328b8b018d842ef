//! Transfer error types.

use std::time::Duration;

use common::{AccountNumber, Money};
use document_store::StoreError;
use thiserror::Error;

use crate::session::SessionState;

/// Errors that can end a transfer attempt or a whole transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Transfer amount was zero or negative.
    #[error("Transfer amount must be positive, got {0}")]
    InvalidAmount(Money),

    /// Source and destination are the same account.
    #[error("Cannot transfer from account {0} to itself")]
    SameAccount(AccountNumber),

    /// An account taking part in the transfer does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountNumber),

    /// The debit would leave the source account below zero.
    #[error("Insufficient funds in account {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AccountNumber,
        balance: Money,
        requested: Money,
    },

    /// The store session or its transaction could not be started.
    #[error("Session error: {0}")]
    Session(#[source] StoreError),

    /// A concurrent transaction won the race at commit time.
    #[error("Commit conflict: {0}")]
    CommitConflict(#[source] StoreError),

    /// Commit failed for a reason other than a conflict.
    #[error("Commit error: {0}")]
    Commit(#[source] StoreError),

    /// A nested scope was dropped without finishing, so the outer
    /// transaction refused to commit.
    #[error("Nested transaction scope was abandoned; outer commit refused")]
    NestedScopeAbandoned,

    /// A lifecycle operation was invoked in the wrong state.
    #[error("Invalid session state: expected {expected}, actual {actual}")]
    InvalidSessionState {
        expected: SessionState,
        actual: SessionState,
    },

    /// Store error raised by a read or write inside the attempt.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Every attempt failed with a transient error.
    #[error("Transfer failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<TransferError>,
    },

    /// The overall deadline elapsed before an attempt could commit.
    #[error("Transfer deadline of {deadline:?} exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32, deadline: Duration },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransferError {
    /// Returns true for failures caused by the request itself rather than by
    /// infrastructure. Retrying these can never change the outcome.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            TransferError::InvalidAmount(_)
                | TransferError::SameAccount(_)
                | TransferError::AccountNotFound(_)
                | TransferError::InsufficientFunds { .. }
        )
    }

    /// Short, stable name used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount(_) => "invalid_amount",
            TransferError::SameAccount(_) => "same_account",
            TransferError::AccountNotFound(_) => "account_not_found",
            TransferError::InsufficientFunds { .. } => "insufficient_funds",
            TransferError::Session(_) => "session",
            TransferError::CommitConflict(_) => "commit_conflict",
            TransferError::Commit(_) => "commit",
            TransferError::NestedScopeAbandoned => "nested_scope_abandoned",
            TransferError::InvalidSessionState { .. } => "invalid_session_state",
            TransferError::Store(_) => "store",
            TransferError::RetriesExhausted { .. } => "retries_exhausted",
            TransferError::DeadlineExceeded { .. } => "deadline_exceeded",
            TransferError::Serialization(_) => "serialization",
        }
    }
}

/// Convenience type alias for transfer results.
pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_rules_are_told_apart_from_infrastructure() {
        let refused = TransferError::InsufficientFunds {
            account: AccountNumber::new("A"),
            balance: Money::from_cents(10),
            requested: Money::from_cents(30),
        };
        assert!(refused.is_business_rule());
        assert_eq!(refused.kind(), "insufficient_funds");

        let conflict = TransferError::CommitConflict(StoreError::TransactionConflict(
            "could not serialize access".to_string(),
        ));
        assert!(!conflict.is_business_rule());
        assert_eq!(conflict.kind(), "commit_conflict");

        let timed_out = TransferError::DeadlineExceeded {
            attempts: 1,
            deadline: Duration::from_millis(100),
        };
        assert!(!timed_out.is_business_rule());
    }
}
