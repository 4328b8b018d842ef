use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    BulkWriteResult, Document, Increment, Result, StoreError,
    document::validate_increments,
    store::{DocumentStore, SessionId, StoreSession},
};

type DocKey = (String, String);

#[derive(Debug, Clone)]
struct StoredDocument {
    body: Value,
    /// Commit sequence number of the transaction that last wrote this document.
    version: u64,
}

/// Counters exposed for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub transactions_started: u64,
    pub commits: u64,
    pub aborts: u64,
    pub conflicts: u64,
}

/// Countdown of injected failures. `u32::MAX` means "every time".
#[derive(Debug, Default)]
struct Faults {
    commit_conflicts: u32,
    write_conflicts: u32,
}

fn add_to_sum(acc: i64, value: i64, field: &str) -> Result<i64> {
    acc.checked_add(value)
        .ok_or_else(|| StoreError::InvalidOperation(format!("sum of '{field}' overflows i64")))
}

fn take_fault(counter: &mut u32) -> bool {
    match *counter {
        0 => false,
        u32::MAX => true,
        _ => {
            *counter -= 1;
            true
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    collections: HashMap<String, BTreeMap<String, StoredDocument>>,
    commit_seq: u64,
    locks: HashMap<DocKey, SessionId>,
    next_session: u64,
    faults: Faults,
    stats: StoreStats,
}

impl StoreState {
    fn committed(&self, collection: &str, key: &str) -> Option<&StoredDocument> {
        self.collections.get(collection)?.get(key)
    }

    fn release_locks(&mut self, session: SessionId) {
        self.locks.retain(|_, owner| *owner != session);
    }

    /// Takes the write lock on a document for `session`.
    ///
    /// Fails when another open transaction holds the lock, or when the
    /// document was committed after this transaction's snapshot.
    fn acquire_for_write(
        &mut self,
        session: SessionId,
        snapshot: u64,
        collection: &str,
        key: &str,
    ) -> Result<()> {
        let doc_key = (collection.to_string(), key.to_string());
        let locked_elsewhere = self
            .locks
            .get(&doc_key)
            .is_some_and(|owner| *owner != session);
        let modified_since_snapshot = self
            .committed(collection, key)
            .is_some_and(|doc| doc.version > snapshot);

        if locked_elsewhere || modified_since_snapshot {
            self.stats.conflicts += 1;
            return Err(StoreError::WriteConflict {
                collection: collection.to_string(),
                key: key.to_string(),
            });
        }

        self.locks.insert(doc_key, session);
        Ok(())
    }
}

fn lock(state: &Mutex<StoreState>) -> MutexGuard<'_, StoreState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory document store with optimistic concurrency control.
///
/// Transactions stage writes privately and take per-document write locks;
/// a second transaction writing a locked or newer document gets a
/// `WriteConflict`. Failures can be injected to exercise retry paths.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryDocumentStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the store counters.
    pub fn stats(&self) -> StoreStats {
        lock(&self.state).stats
    }

    /// Makes the next `count` commits fail with a transient conflict.
    pub fn fail_next_commits(&self, count: u32) {
        lock(&self.state).faults.commit_conflicts = count;
    }

    /// Makes every commit fail with a transient conflict until cleared.
    pub fn fail_all_commits(&self) {
        self.fail_next_commits(u32::MAX);
    }

    /// Makes the next `count` transactional increments fail with a write conflict.
    pub fn fail_next_writes(&self, count: u32) {
        lock(&self.state).faults.write_conflicts = count;
    }

    /// Returns the number of committed documents in a collection.
    pub fn document_count(&self, collection: &str) -> usize {
        lock(&self.state)
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns the number of document locks currently held by open transactions.
    pub fn held_locks(&self) -> usize {
        lock(&self.state).locks.len()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    type Session = InMemorySession;

    async fn start_session(&self) -> Result<InMemorySession> {
        let mut state = lock(&self.state);
        state.next_session += 1;
        state.stats.sessions_started += 1;
        Ok(InMemorySession {
            id: SessionId(state.next_session),
            state: Arc::clone(&self.state),
            txn: None,
            ended: false,
        })
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        let mut state = lock(&self.state);
        if state.committed(collection, &document.key).is_some() {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                key: document.key,
            });
        }
        state.commit_seq += 1;
        let version = state.commit_seq;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(
                document.key,
                StoredDocument {
                    body: document.body,
                    version,
                },
            );
        Ok(())
    }

    async fn find_one(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let state = lock(&self.state);
        Ok(state
            .committed(collection, key)
            .map(|doc| Document::new(key, doc.body.clone())))
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        let state = lock(&self.state);
        Ok(state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(key, doc)| Document::new(key.clone(), doc.body.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn sum_field(&self, collection: &str, field: &str) -> Result<i64> {
        let documents = self.find_all(collection).await?;
        documents
            .iter()
            .try_fold(0i64, |acc, doc| add_to_sum(acc, doc.integer_field(field)?, field))
    }
}

#[derive(Debug)]
struct PendingWrite {
    body: Value,
    insert: bool,
}

#[derive(Debug)]
struct PendingTransaction {
    snapshot: u64,
    writes: BTreeMap<DocKey, PendingWrite>,
}

impl PendingTransaction {
    /// Current body of a document as this transaction sees it.
    fn visible(&self, state: &StoreState, collection: &str, key: &str) -> Option<PendingWrite> {
        match self.writes.get(&(collection.to_string(), key.to_string())) {
            Some(write) => Some(PendingWrite {
                body: write.body.clone(),
                insert: write.insert,
            }),
            None => state.committed(collection, key).map(|doc| PendingWrite {
                body: doc.body.clone(),
                insert: false,
            }),
        }
    }
}

/// Session on an [`InMemoryDocumentStore`].
///
/// Dropping the session ends it, which rolls back any open transaction and
/// releases its locks.
pub struct InMemorySession {
    id: SessionId,
    state: Arc<Mutex<StoreState>>,
    txn: Option<PendingTransaction>,
    ended: bool,
}

impl InMemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.ended {
            return Err(StoreError::SessionEnded);
        }
        Ok(())
    }

    fn rollback(&mut self) -> bool {
        match self.txn.take() {
            Some(_) => {
                let mut state = lock(&self.state);
                state.release_locks(self.id);
                state.stats.aborts += 1;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl StoreSession for InMemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    async fn start_transaction(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.txn.is_some() {
            return Err(StoreError::TransactionInProgress);
        }
        let mut state = lock(&self.state);
        state.stats.transactions_started += 1;
        self.txn = Some(PendingTransaction {
            snapshot: state.commit_seq,
            writes: BTreeMap::new(),
        });
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        self.ensure_open()?;
        let txn = self.txn.take().ok_or(StoreError::NoTransaction)?;
        let mut state = lock(&self.state);

        let rejection = if take_fault(&mut state.faults.commit_conflicts) {
            state.stats.conflicts += 1;
            Some(StoreError::TransactionConflict(
                "injected commit conflict".to_string(),
            ))
        } else {
            txn.writes.iter().find_map(|((collection, key), write)| {
                let existing = state.committed(collection, key)?;
                if write.insert {
                    Some(StoreError::DuplicateKey {
                        collection: collection.clone(),
                        key: key.clone(),
                    })
                } else if existing.version > txn.snapshot {
                    Some(StoreError::TransactionConflict(format!(
                        "{collection}/{key} changed since snapshot"
                    )))
                } else {
                    None
                }
            })
        };

        if let Some(error) = rejection {
            state.release_locks(self.id);
            state.stats.aborts += 1;
            return Err(error);
        }

        state.commit_seq += 1;
        let version = state.commit_seq;
        let write_count = txn.writes.len();
        for ((collection, key), write) in txn.writes {
            state.collections.entry(collection).or_default().insert(
                key,
                StoredDocument {
                    body: write.body,
                    version,
                },
            );
        }
        state.release_locks(self.id);
        state.stats.commits += 1;

        tracing::debug!(session = %self.id, version, write_count, "transaction committed");
        Ok(())
    }

    async fn abort_transaction(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.rollback() {
            return Err(StoreError::NoTransaction);
        }
        Ok(())
    }

    fn end_session(&mut self) {
        if self.ended {
            return;
        }
        if self.rollback() {
            tracing::debug!(session = %self.id, "open transaction rolled back on session end");
        }
        lock(&self.state).stats.sessions_ended += 1;
        self.ended = true;
    }

    async fn find_one(&mut self, collection: &str, key: &str) -> Result<Option<Document>> {
        self.ensure_open()?;
        let state = lock(&self.state);
        let visible = match &self.txn {
            Some(txn) => txn.visible(&state, collection, key).map(|w| w.body),
            None => state.committed(collection, key).map(|doc| doc.body.clone()),
        };
        Ok(visible.map(|body| Document::new(key, body)))
    }

    async fn increment(
        &mut self,
        collection: &str,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<Document>> {
        let result = self
            .bulk_increment(collection, &[Increment::new(key, field, delta)])
            .await?;
        Ok(result.documents.into_iter().next().flatten())
    }

    async fn bulk_increment(
        &mut self,
        collection: &str,
        increments: &[Increment],
    ) -> Result<BulkWriteResult> {
        self.ensure_open()?;
        validate_increments(increments)?;
        let txn = self.txn.as_mut().ok_or(StoreError::NoTransaction)?;
        let mut state = lock(&self.state);

        if take_fault(&mut state.faults.write_conflicts) {
            state.stats.conflicts += 1;
            return Err(StoreError::WriteConflict {
                collection: collection.to_string(),
                key: increments[0].key.clone(),
            });
        }

        // Lock and compute every leg before staging any of them.
        let mut staged = Vec::with_capacity(increments.len());
        for op in increments {
            let Some(current) = txn.visible(&state, collection, &op.key) else {
                staged.push(None);
                continue;
            };
            state.acquire_for_write(self.id, txn.snapshot, collection, &op.key)?;
            let mut document = Document::new(op.key.clone(), current.body);
            document.apply_increment(&op.field, op.delta)?;
            staged.push(Some((document, current.insert)));
        }

        let mut result = BulkWriteResult::default();
        for entry in staged {
            let document = entry.map(|(document, insert)| {
                txn.writes.insert(
                    (collection.to_string(), document.key.clone()),
                    PendingWrite {
                        body: document.body.clone(),
                        insert,
                    },
                );
                document
            });
            if document.is_some() {
                result.matched_count += 1;
            }
            result.documents.push(document);
        }
        Ok(result)
    }

    async fn insert_one(&mut self, collection: &str, document: Document) -> Result<()> {
        self.insert_many(collection, vec![document]).await
    }

    async fn insert_many(&mut self, collection: &str, documents: Vec<Document>) -> Result<()> {
        self.ensure_open()?;
        let txn = self.txn.as_mut().ok_or(StoreError::NoTransaction)?;
        let mut state = lock(&self.state);

        for (i, document) in documents.iter().enumerate() {
            let repeated = documents[..i].iter().any(|d| d.key == document.key);
            if repeated || txn.visible(&state, collection, &document.key).is_some() {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    key: document.key.clone(),
                });
            }
        }
        for document in &documents {
            state.acquire_for_write(self.id, txn.snapshot, collection, &document.key)?;
        }
        for document in documents {
            txn.writes.insert(
                (collection.to_string(), document.key),
                PendingWrite {
                    body: document.body,
                    insert: true,
                },
            );
        }
        Ok(())
    }

    async fn sum_field(&mut self, collection: &str, field: &str) -> Result<i64> {
        self.ensure_open()?;
        let state = lock(&self.state);
        let mut bodies: BTreeMap<&str, &Value> = state
            .collections
            .get(collection)
            .map(|docs| docs.iter().map(|(k, d)| (k.as_str(), &d.body)).collect())
            .unwrap_or_default();
        if let Some(txn) = &self.txn {
            for ((c, key), write) in &txn.writes {
                if c == collection {
                    bodies.insert(key.as_str(), &write.body);
                }
            }
        }
        bodies.iter().try_fold(0i64, |acc, (key, body)| {
            let value = Document::new(*key, (*body).clone()).integer_field(field)?;
            add_to_sum(acc, value, field)
        })
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.end_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_accounts() -> InMemoryDocumentStore {
        let store = InMemoryDocumentStore::new();
        for (key, balance) in [("A", 100), ("B", 50)] {
            store
                .insert_one(
                    "accounts",
                    Document::new(key, serde_json::json!({ "balance": balance })),
                )
                .await
                .unwrap();
        }
        store
    }

    async fn balance(store: &InMemoryDocumentStore, key: &str) -> i64 {
        store
            .find_one("accounts", key)
            .await
            .unwrap()
            .unwrap()
            .integer_field("balance")
            .unwrap()
    }

    #[tokio::test]
    async fn committed_writes_become_visible() {
        let store = store_with_accounts().await;
        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();

        let doc = session
            .increment("accounts", "A", "balance", -30)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.integer_field("balance").unwrap(), 70);

        // Not visible outside the session yet
        assert_eq!(balance(&store, "A").await, 100);

        session.commit_transaction().await.unwrap();
        assert_eq!(balance(&store, "A").await, 70);
        assert_eq!(store.held_locks(), 0);
    }

    #[tokio::test]
    async fn aborted_writes_are_discarded() {
        let store = store_with_accounts().await;
        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        session
            .increment("accounts", "A", "balance", -30)
            .await
            .unwrap();
        session
            .insert_one("transfers", Document::new("t1", serde_json::json!({})))
            .await
            .unwrap();

        session.abort_transaction().await.unwrap();

        assert_eq!(balance(&store, "A").await, 100);
        assert_eq!(store.document_count("transfers"), 0);
        assert_eq!(store.held_locks(), 0);
        assert_eq!(store.stats().aborts, 1);
    }

    #[tokio::test]
    async fn increment_missing_document_returns_none() {
        let store = store_with_accounts().await;
        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        let result = session
            .increment("accounts", "missing", "balance", 10)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn writes_require_a_transaction() {
        let store = store_with_accounts().await;
        let mut session = store.start_session().await.unwrap();
        let result = session.increment("accounts", "A", "balance", 1).await;
        assert!(matches!(result, Err(StoreError::NoTransaction)));
    }

    #[tokio::test]
    async fn concurrent_writer_gets_write_conflict() {
        let store = store_with_accounts().await;
        let mut first = store.start_session().await.unwrap();
        let mut second = store.start_session().await.unwrap();
        first.start_transaction().await.unwrap();
        second.start_transaction().await.unwrap();

        first
            .increment("accounts", "A", "balance", -10)
            .await
            .unwrap();
        let result = second.increment("accounts", "A", "balance", -10).await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, StoreError::WriteConflict { .. }));
    }

    #[tokio::test]
    async fn write_after_newer_commit_conflicts() {
        let store = store_with_accounts().await;
        let mut stale = store.start_session().await.unwrap();
        stale.start_transaction().await.unwrap();

        let mut fresh = store.start_session().await.unwrap();
        fresh.start_transaction().await.unwrap();
        fresh
            .increment("accounts", "A", "balance", 5)
            .await
            .unwrap();
        fresh.commit_transaction().await.unwrap();

        let err = stale
            .increment("accounts", "A", "balance", 5)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(balance(&store, "A").await, 105);
    }

    #[tokio::test]
    async fn ending_session_releases_locks() {
        let store = store_with_accounts().await;
        let mut first = store.start_session().await.unwrap();
        first.start_transaction().await.unwrap();
        first
            .increment("accounts", "A", "balance", -10)
            .await
            .unwrap();
        first.end_session();
        first.end_session();

        let mut second = store.start_session().await.unwrap();
        second.start_transaction().await.unwrap();
        second
            .increment("accounts", "A", "balance", -10)
            .await
            .unwrap();
        second.commit_transaction().await.unwrap();
        assert_eq!(balance(&store, "A").await, 90);

        assert!(matches!(
            first.start_transaction().await,
            Err(StoreError::SessionEnded)
        ));
    }

    #[tokio::test]
    async fn dropping_session_rolls_back() {
        let store = store_with_accounts().await;
        {
            let mut session = store.start_session().await.unwrap();
            session.start_transaction().await.unwrap();
            session
                .increment("accounts", "B", "balance", 1000)
                .await
                .unwrap();
        }
        assert_eq!(balance(&store, "B").await, 50);
        assert_eq!(store.held_locks(), 0);
    }

    #[tokio::test]
    async fn injected_commit_conflicts_count_down() {
        let store = store_with_accounts().await;
        store.fail_next_commits(1);

        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        session
            .increment("accounts", "A", "balance", -1)
            .await
            .unwrap();
        let err = session.commit_transaction().await.unwrap_err();
        assert!(err.is_transient());
        assert!(!session.in_transaction());
        assert_eq!(balance(&store, "A").await, 100);

        session.start_transaction().await.unwrap();
        session
            .increment("accounts", "A", "balance", -1)
            .await
            .unwrap();
        session.commit_transaction().await.unwrap();
        assert_eq!(balance(&store, "A").await, 99);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = store_with_accounts().await;
        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        let result = session
            .insert_one("accounts", Document::new("A", serde_json::json!({})))
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));

        let result = session
            .insert_many(
                "transfers",
                vec![
                    Document::new("t1", serde_json::json!({})),
                    Document::new("t1", serde_json::json!({})),
                ],
            )
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn bulk_increment_reports_unmatched_keys() {
        let store = store_with_accounts().await;
        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();

        let result = session
            .bulk_increment(
                "accounts",
                &[
                    Increment::new("A", "balance", -20),
                    Increment::new("missing", "balance", 20),
                ],
            )
            .await
            .unwrap();

        assert_eq!(result.matched_count, 1);
        assert!(result.documents[0].is_some());
        assert!(result.documents[1].is_none());
    }

    #[tokio::test]
    async fn session_sum_includes_own_writes() {
        let store = store_with_accounts().await;
        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        session
            .increment("accounts", "A", "balance", -30)
            .await
            .unwrap();

        assert_eq!(session.sum_field("accounts", "balance").await.unwrap(), 120);
        assert_eq!(store.sum_field("accounts", "balance").await.unwrap(), 150);
    }

    #[tokio::test]
    async fn sum_overflow_is_an_error() {
        let store = InMemoryDocumentStore::new();
        for (key, balance) in [("A", i64::MAX), ("B", 1)] {
            store
                .insert_one(
                    "accounts",
                    Document::new(key, serde_json::json!({ "balance": balance })),
                )
                .await
                .unwrap();
        }

        let err = store.sum_field("accounts", "balance").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));

        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        let err = session.sum_field("accounts", "balance").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
    }
}
