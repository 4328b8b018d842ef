use async_trait::async_trait;

use crate::{BulkWriteResult, Document, Increment, Result};

/// Identifier of a store session, unique within one store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Core trait for document store implementations.
///
/// Store-level operations run outside any transaction and see committed data
/// only. Transactional work goes through a [`StoreSession`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Session type handed out by this store.
    type Session: StoreSession;

    /// Acquires a new session. No transaction is open on it yet.
    async fn start_session(&self) -> Result<Self::Session>;

    /// Inserts a document outside any transaction.
    ///
    /// Fails with `DuplicateKey` if the key already exists.
    async fn insert_one(&self, collection: &str, document: Document) -> Result<()>;

    /// Reads a committed document.
    async fn find_one(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Reads every committed document in a collection, ordered by key.
    async fn find_all(&self, collection: &str) -> Result<Vec<Document>>;

    /// Sums an integer field across all committed documents in a collection.
    async fn sum_field(&self, collection: &str, field: &str) -> Result<i64>;
}

/// An isolated execution context grouping writes into one atomic unit.
///
/// Writes become visible to other sessions only when the transaction commits.
/// A write that collides with a concurrent transaction fails with an error
/// labelled [`ErrorLabel::TransientTransactionError`](crate::ErrorLabel).
#[async_trait]
pub trait StoreSession: Send {
    fn id(&self) -> SessionId;

    /// Returns true while a transaction is open on this session.
    fn in_transaction(&self) -> bool;

    /// Opens a transaction with snapshot isolation.
    async fn start_transaction(&mut self) -> Result<()>;

    /// Commits the open transaction. On failure the transaction is rolled back.
    async fn commit_transaction(&mut self) -> Result<()>;

    /// Rolls back the open transaction, discarding its writes.
    async fn abort_transaction(&mut self) -> Result<()>;

    /// Releases the session. Rolls back an open transaction. Idempotent.
    fn end_session(&mut self);

    /// Reads a document, including this transaction's own writes.
    async fn find_one(&mut self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Adds `delta` to an integer field of the document matching `key`.
    ///
    /// Returns the post-update document, or `None` when no document matches.
    async fn increment(
        &mut self,
        collection: &str,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<Document>>;

    /// Applies several increments as one grouped write. Keys must be distinct.
    async fn bulk_increment(
        &mut self,
        collection: &str,
        increments: &[Increment],
    ) -> Result<BulkWriteResult>;

    /// Inserts a document inside the transaction.
    async fn insert_one(&mut self, collection: &str, document: Document) -> Result<()>;

    /// Inserts several documents inside the transaction.
    async fn insert_many(&mut self, collection: &str, documents: Vec<Document>) -> Result<()>;

    /// Sums an integer field across the collection as seen by this transaction.
    async fn sum_field(&mut self, collection: &str, field: &str) -> Result<i64>;
}
