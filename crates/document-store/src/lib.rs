//! Transactional document store.
//!
//! Documents are JSON bodies grouped into collections and addressed by key.
//! All multi-document work runs inside a [`StoreSession`] transaction;
//! conflicting concurrent transactions surface errors carrying the
//! [`ErrorLabel::TransientTransactionError`] label.

pub mod document;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use document::{BulkWriteResult, Document, Increment};
pub use error::{ErrorLabel, Result, StoreError};
pub use memory::{InMemoryDocumentStore, InMemorySession, StoreStats};
pub use postgres::{PostgresDocumentStore, PostgresSession};
pub use store::{DocumentStore, SessionId, StoreSession};
