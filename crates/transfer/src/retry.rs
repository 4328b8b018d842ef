//! Retry classification.

use document_store::ErrorLabel;

use crate::error::TransferError;

/// Whether a failed attempt is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caused by concurrent activity; a fresh attempt may succeed.
    Transient,
    /// Retrying cannot change the outcome.
    Fatal,
}

/// Decides whether a failed attempt should be retried.
pub trait RetryClassifier: Send + Sync {
    fn classify(&self, error: &TransferError) -> ErrorClass;

    fn is_retryable(&self, error: &TransferError) -> bool {
        self.classify(error) == ErrorClass::Transient
    }
}

/// Classifies on the store's transient transaction label.
///
/// Commit conflicts and labelled write conflicts are transient. Business
/// rule violations, lifecycle misuse and unlabelled store failures are fatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelClassifier;

impl RetryClassifier for LabelClassifier {
    fn classify(&self, error: &TransferError) -> ErrorClass {
        match error {
            TransferError::CommitConflict(_) => ErrorClass::Transient,
            TransferError::Store(e) | TransferError::Session(e)
                if e.has_label(ErrorLabel::TransientTransactionError) =>
            {
                ErrorClass::Transient
            }
            _ => ErrorClass::Fatal,
        }
    }
}
