use thiserror::Error;

/// Labels a store attaches to errors so callers can decide how to react
/// without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorLabel {
    /// Another transaction touched the same data. The whole transaction can
    /// be retried from the start in a fresh session.
    TransientTransactionError,
}

/// Errors that can occur when interacting with the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write inside a transaction hit a document modified or locked by a
    /// concurrent transaction.
    #[error("Write conflict on {collection}/{key}")]
    WriteConflict { collection: String, key: String },

    /// The store rejected the transaction because it could not be serialized
    /// against concurrent transactions.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// A document with the same key already exists.
    #[error("Duplicate key {collection}/{key}")]
    DuplicateKey { collection: String, key: String },

    /// An operation that requires a transaction ran outside one.
    #[error("No transaction in progress")]
    NoTransaction,

    /// A transaction was started while another was still open on the session.
    #[error("Transaction already in progress")]
    TransactionInProgress,

    /// The session was used after `end_session`.
    #[error("Session has ended")]
    SessionEnded,

    /// The request itself is malformed (bad field type, repeated key, ...).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if the store attached `label` to this error.
    pub fn has_label(&self, label: ErrorLabel) -> bool {
        match label {
            ErrorLabel::TransientTransactionError => matches!(
                self,
                StoreError::WriteConflict { .. } | StoreError::TransactionConflict(_)
            ),
        }
    }

    /// Shorthand for the transient-transaction label.
    pub fn is_transient(&self) -> bool {
        self.has_label(ErrorLabel::TransientTransactionError)
    }
}

/// Result type for document store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
