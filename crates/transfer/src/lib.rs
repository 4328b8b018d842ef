//! Atomic funds transfers over a transactional document store.
//!
//! A transfer debits one account, credits another and appends an audit
//! record, all inside one store transaction. Either all three writes commit
//! or none is observable.
//!
//! The [`TransferCoordinator`] runs each transfer as a series of whole
//! attempts:
//! 1. Open a fresh [`TransactionSession`]
//! 2. Execute the transfer logic through the [`TransferEngine`]
//! 3. Commit, or abort on any error
//! 4. End the session
//!
//! Transient conflicts reported by the store are retried up to a bounded
//! number of attempts; business rule violations fail immediately.

pub mod account;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod retry;
pub mod session;

pub use account::{ACCOUNTS, Account, AccountStore};
pub use config::RetryPolicy;
pub use coordinator::TransferCoordinator;
pub use engine::{TransferAttempt, TransferEngine, TransferMode, TransferResult, validate_request};
pub use error::{Result, TransferError};
pub use ledger::{AuditLedger, TRANSFERS, TransferRecord, TransferStatus};
pub use retry::{ErrorClass, LabelClassifier, RetryClassifier};
pub use session::{NestedTransaction, SessionState, TransactionSession};
