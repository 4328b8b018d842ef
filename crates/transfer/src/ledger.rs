//! Append-only audit ledger of transfers.

use chrono::{DateTime, Utc};
use common::{AccountNumber, Money, TransferId};
use document_store::{Document, DocumentStore, StoreSession};
use serde::{Deserialize, Serialize};

use crate::engine::{TransferAttempt, TransferMode};
use crate::error::Result;

/// Collection holding transfer records, keyed by transfer ID.
pub const TRANSFERS: &str = "transfers";

/// Outcome recorded for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Completed,
    Failed,
}

/// Durable record of a transfer, independent of current balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub from_account: AccountNumber,
    pub to_account: AccountNumber,
    pub amount: Money,
    pub status: TransferStatus,
    pub mode: TransferMode,
    /// Attempt number that produced this record.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn completed(attempt: &TransferAttempt, mode: TransferMode) -> Self {
        Self::build(attempt, mode, TransferStatus::Completed, None)
    }

    pub fn failed(attempt: &TransferAttempt, mode: TransferMode, reason: impl Into<String>) -> Self {
        Self::build(attempt, mode, TransferStatus::Failed, Some(reason.into()))
    }

    fn build(
        attempt: &TransferAttempt,
        mode: TransferMode,
        status: TransferStatus,
        reason: Option<String>,
    ) -> Self {
        Self {
            transfer_id: attempt.transfer_id,
            from_account: attempt.from.clone(),
            to_account: attempt.to.clone(),
            amount: attempt.amount,
            status,
            mode,
            attempt: attempt.attempt_number,
            reason,
            created_at: Utc::now(),
        }
    }

    /// Returns true if the record involves `account` on either side.
    pub fn involves(&self, account: &AccountNumber) -> bool {
        &self.from_account == account || &self.to_account == account
    }
}

/// Append-only store of [`TransferRecord`]s.
///
/// Records are keyed by transfer ID, so a transfer can never commit two
/// records no matter how many attempts it takes.
#[derive(Clone)]
pub struct AuditLedger<S> {
    store: S,
}

impl<S: DocumentStore> AuditLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Appends a record inside `session`.
    pub async fn append(&self, session: &mut S::Session, record: &TransferRecord) -> Result<()> {
        let document = Document::from_value(record.transfer_id.to_string(), record)?;
        session.insert_one(TRANSFERS, document).await?;
        Ok(())
    }

    /// Reads a committed record.
    pub async fn get(&self, transfer_id: TransferId) -> Result<Option<TransferRecord>> {
        let document = self
            .store
            .find_one(TRANSFERS, &transfer_id.to_string())
            .await?;
        Ok(document.map(|doc| doc.parse()).transpose()?)
    }

    /// All committed records, oldest first.
    pub async fn list(&self) -> Result<Vec<TransferRecord>> {
        let mut records = self
            .store
            .find_all(TRANSFERS)
            .await?
            .iter()
            .map(|doc| doc.parse::<TransferRecord>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.transfer_id.as_uuid().cmp(&b.transfer_id.as_uuid()))
        });
        Ok(records)
    }

    /// Committed records involving `account`, oldest first.
    pub async fn for_account(&self, account: &AccountNumber) -> Result<Vec<TransferRecord>> {
        let records = self.list().await?;
        Ok(records.into_iter().filter(|r| r.involves(account)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document_store::InMemoryDocumentStore;

    fn attempt(from: &str, to: &str, cents: i64) -> TransferAttempt {
        TransferAttempt::new(TransferId::new(), from.into(), to.into(), Money::from_cents(cents), 1)
    }

    #[tokio::test]
    async fn append_is_visible_after_commit_only() {
        let store = InMemoryDocumentStore::new();
        let ledger = AuditLedger::new(store.clone());
        let record = TransferRecord::completed(&attempt("A", "B", 30), TransferMode::Standard);

        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        ledger.append(&mut session, &record).await.unwrap();
        assert!(ledger.get(record.transfer_id).await.unwrap().is_none());

        session.commit_transaction().await.unwrap();
        let stored = ledger.get(record.transfer_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Completed);
        assert_eq!(stored.amount, Money::from_cents(30));
    }

    #[tokio::test]
    async fn second_record_for_same_transfer_is_rejected() {
        let store = InMemoryDocumentStore::new();
        let ledger = AuditLedger::new(store.clone());
        let record = TransferRecord::completed(&attempt("A", "B", 30), TransferMode::Standard);

        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        ledger.append(&mut session, &record).await.unwrap();
        session.commit_transaction().await.unwrap();

        session.start_transaction().await.unwrap();
        assert!(ledger.append(&mut session, &record).await.is_err());
    }

    #[tokio::test]
    async fn for_account_filters_by_party() {
        let store = InMemoryDocumentStore::new();
        let ledger = AuditLedger::new(store.clone());
        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        for (from, to) in [("A", "B"), ("B", "C"), ("C", "D")] {
            let record = TransferRecord::completed(&attempt(from, to, 1), TransferMode::Bulk);
            ledger.append(&mut session, &record).await.unwrap();
        }
        session.commit_transaction().await.unwrap();

        assert_eq!(ledger.list().await.unwrap().len(), 3);
        assert_eq!(ledger.for_account(&"B".into()).await.unwrap().len(), 2);
        assert!(ledger.for_account(&"Z".into()).await.unwrap().is_empty());
    }

    #[test]
    fn failed_record_carries_reason() {
        let record = TransferRecord::failed(
            &attempt("A", "B", 30),
            TransferMode::Nested,
            "insufficient funds",
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["mode"], "nested");
        assert_eq!(json["reason"], "insufficient funds");
    }
}
