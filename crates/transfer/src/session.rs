//! Transaction session lifecycle.

use document_store::{DocumentStore, SessionId, StoreSession};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};

/// The state of a transaction session in its lifecycle.
///
/// State transitions:
/// ```text
/// Created ──► Active ──┬──► Committed ──┐
///                      └──► Aborted ────┴──► Ended
/// ```
/// `end` is accepted from any state; ending an Active session aborts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionState {
    /// Session object exists, no store resources held.
    #[default]
    Created,

    /// A store transaction is open.
    Active,

    /// The transaction committed.
    Committed,

    /// The transaction rolled back.
    Aborted,

    /// Store resources released (terminal state).
    Ended,
}

impl SessionState {
    /// Returns true once the transaction outcome is decided.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Committed | SessionState::Aborted | SessionState::Ended
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "Created",
            SessionState::Active => "Active",
            SessionState::Committed => "Committed",
            SessionState::Aborted => "Aborted",
            SessionState::Ended => "Ended",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One attempt's isolated execution context.
///
/// A session is used for exactly one attempt and then ended. `end` consumes
/// the session; a session dropped without `end` (panic, cancelled future)
/// is ended by `Drop`, which rolls back an open transaction.
pub struct TransactionSession<'a, S: DocumentStore> {
    store: &'a S,
    inner: Option<S::Session>,
    state: SessionState,
    nested_open: bool,
    nested_phases: u32,
}

impl<'a, S: DocumentStore> TransactionSession<'a, S> {
    /// Creates a session in the `Created` state. Nothing is acquired yet.
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            inner: None,
            state: SessionState::Created,
            nested_open: false,
            nested_phases: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Store session ID, once started.
    pub fn id(&self) -> Option<SessionId> {
        self.inner.as_ref().map(|session| session.id())
    }

    /// Number of nested scopes opened on this session.
    pub fn nested_phases(&self) -> u32 {
        self.nested_phases
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state != expected {
            return Err(TransferError::InvalidSessionState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Acquires a store session and opens a transaction.
    pub async fn start(&mut self) -> Result<()> {
        self.expect_state(SessionState::Created)?;
        let mut session = self
            .store
            .start_session()
            .await
            .map_err(TransferError::Session)?;
        session
            .start_transaction()
            .await
            .map_err(TransferError::Session)?;

        tracing::debug!(session = %session.id(), "transaction started");
        self.inner = Some(session);
        self.state = SessionState::Active;
        Ok(())
    }

    /// Returns the store session while the transaction is open.
    pub fn active(&mut self) -> Result<&mut S::Session> {
        self.expect_state(SessionState::Active)?;
        let actual = self.state;
        self.inner
            .as_mut()
            .ok_or(TransferError::InvalidSessionState {
                expected: SessionState::Active,
                actual,
            })
    }

    /// Commits the transaction.
    ///
    /// A conflict yields `CommitConflict`; any other failure yields `Commit`.
    /// Either way the session ends up `Aborted`.
    pub async fn commit(&mut self) -> Result<()> {
        if self.nested_open {
            self.abort().await;
            return Err(TransferError::NestedScopeAbandoned);
        }
        let session = self.active()?;
        let id = session.id();

        match session.commit_transaction().await {
            Ok(()) => {
                self.state = SessionState::Committed;
                tracing::debug!(session = %id, "transaction committed");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Aborted;
                tracing::debug!(session = %id, error = %e, "commit failed");
                if e.is_transient() {
                    Err(TransferError::CommitConflict(e))
                } else {
                    Err(TransferError::Commit(e))
                }
            }
        }
    }

    /// Rolls back the transaction. Never fails; store errors are logged.
    pub async fn abort(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        if let Some(session) = self.inner.as_mut() {
            if let Err(e) = session.abort_transaction().await {
                tracing::warn!(session = %session.id(), error = %e, "abort failed, session end will roll back");
            } else {
                tracing::debug!(session = %session.id(), "transaction aborted");
            }
        }
        self.state = SessionState::Aborted;
    }

    /// Releases the store session.
    pub fn end(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.state == SessionState::Ended {
            return;
        }
        if let Some(mut session) = self.inner.take() {
            session.end_session();
        }
        self.state = SessionState::Ended;
    }

    /// Opens a nested scope inside this transaction.
    ///
    /// The scope writes through the outer transaction and cannot commit on its
    /// own. It must be finished before the outer session commits.
    pub fn nested(&mut self) -> Result<NestedTransaction<'_, 'a, S>> {
        self.expect_state(SessionState::Active)?;
        self.nested_open = true;
        self.nested_phases += 1;
        Ok(NestedTransaction {
            outer: self,
            finished: false,
        })
    }
}

impl<S: DocumentStore> Drop for TransactionSession<'_, S> {
    fn drop(&mut self) {
        if self.state != SessionState::Ended {
            tracing::warn!(state = %self.state, "transaction session dropped without end");
            self.release();
        }
    }
}

/// Inner transaction bound to an outer [`TransactionSession`].
///
/// It only ever commits as part of the outer transaction.
pub struct NestedTransaction<'s, 'a, S: DocumentStore> {
    outer: &'s mut TransactionSession<'a, S>,
    finished: bool,
}

impl<S: DocumentStore> NestedTransaction<'_, '_, S> {
    /// Returns the outer transaction's store session.
    pub fn active(&mut self) -> Result<&mut S::Session> {
        self.outer.active()
    }

    /// Closes the scope. Its writes now commit or abort with the outer session.
    pub fn finish(mut self) {
        self.outer.nested_open = false;
        self.finished = true;
    }
}

impl<S: DocumentStore> Drop for NestedTransaction<'_, '_, S> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("nested scope dropped unfinished, outer commit will be refused");
        }
    }
}
