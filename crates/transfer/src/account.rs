//! Account documents and session-scoped balance updates.

use chrono::{DateTime, Utc};
use common::{AccountNumber, Money};
use document_store::{Document, DocumentStore, Increment, StoreSession};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};

/// Collection holding account documents, keyed by account number.
pub const ACCOUNTS: &str = "accounts";

const BALANCE_FIELD: &str = "balance";

/// An account balance document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_number: AccountNumber,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(account_number: impl Into<AccountNumber>, balance: Money) -> Self {
        Self {
            account_number: account_number.into(),
            balance,
            created_at: Utc::now(),
        }
    }

    fn from_document(document: &Document) -> Result<Self> {
        Ok(document.parse()?)
    }
}

/// Access to account documents.
///
/// Balance changes only happen through `debit`, `credit` and `apply_legs`,
/// each inside a caller-owned transaction. None of them enforce a
/// non-negative balance: the caller inspects the returned document and
/// aborts the transaction if the balance went below zero.
#[derive(Clone)]
pub struct AccountStore<S> {
    store: S,
}

impl<S: DocumentStore> AccountStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Creates an account outside any transfer.
    pub async fn open_account(
        &self,
        account_number: impl Into<AccountNumber>,
        initial_balance: Money,
    ) -> Result<Account> {
        if initial_balance.is_negative() {
            return Err(TransferError::InvalidAmount(initial_balance));
        }
        let account = Account::new(account_number, initial_balance);
        let document = Document::from_value(account.account_number.as_str(), &account)?;
        self.store.insert_one(ACCOUNTS, document).await?;
        tracing::info!(account = %account.account_number, balance = %initial_balance, "account opened");
        Ok(account)
    }

    /// Reads the committed state of an account.
    pub async fn get(&self, account_number: &AccountNumber) -> Result<Option<Account>> {
        self.store
            .find_one(ACCOUNTS, account_number.as_str())
            .await?
            .as_ref()
            .map(Account::from_document)
            .transpose()
    }

    /// Lists all accounts ordered by account number.
    pub async fn list(&self) -> Result<Vec<Account>> {
        self.store
            .find_all(ACCOUNTS)
            .await?
            .iter()
            .map(Account::from_document)
            .collect()
    }

    /// Sum of all committed balances. Transfers never change it.
    pub async fn total_balance(&self) -> Result<Money> {
        let cents = self.store.sum_field(ACCOUNTS, BALANCE_FIELD).await?;
        Ok(Money::from_cents(cents))
    }

    /// Decrements the balance inside `session`.
    ///
    /// Returns the updated account, or `None` if the account does not exist.
    pub async fn debit(
        &self,
        session: &mut S::Session,
        account_number: &AccountNumber,
        amount: Money,
    ) -> Result<Option<Account>> {
        self.increment(session, account_number, -amount).await
    }

    /// Increments the balance inside `session`.
    pub async fn credit(
        &self,
        session: &mut S::Session,
        account_number: &AccountNumber,
        amount: Money,
    ) -> Result<Option<Account>> {
        self.increment(session, account_number, amount).await
    }

    async fn increment(
        &self,
        session: &mut S::Session,
        account_number: &AccountNumber,
        delta: Money,
    ) -> Result<Option<Account>> {
        session
            .increment(ACCOUNTS, account_number.as_str(), BALANCE_FIELD, delta.cents())
            .await?
            .as_ref()
            .map(Account::from_document)
            .transpose()
    }

    /// Applies several balance changes as one grouped write.
    ///
    /// Results are aligned with `legs`; `None` marks a missing account.
    pub async fn apply_legs(
        &self,
        session: &mut S::Session,
        legs: &[(AccountNumber, Money)],
    ) -> Result<Vec<Option<Account>>> {
        let increments: Vec<Increment> = legs
            .iter()
            .map(|(number, delta)| Increment::new(number.as_str(), BALANCE_FIELD, delta.cents()))
            .collect();
        let result = session.bulk_increment(ACCOUNTS, &increments).await?;
        result
            .documents
            .iter()
            .map(|doc| doc.as_ref().map(Account::from_document).transpose())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document_store::InMemoryDocumentStore;

    #[tokio::test]
    async fn open_and_get_account() {
        let accounts = AccountStore::new(InMemoryDocumentStore::new());
        accounts
            .open_account("A", Money::from_cents(100))
            .await
            .unwrap();

        let account = accounts.get(&"A".into()).await.unwrap().unwrap();
        assert_eq!(account.balance, Money::from_cents(100));
        assert!(accounts.get(&"B".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_rejects_duplicates_and_negative_balances() {
        let accounts = AccountStore::new(InMemoryDocumentStore::new());
        accounts.open_account("A", Money::zero()).await.unwrap();

        let duplicate = accounts.open_account("A", Money::zero()).await;
        assert!(matches!(duplicate, Err(TransferError::Store(_))));

        let negative = accounts.open_account("B", Money::from_cents(-1)).await;
        assert!(matches!(negative, Err(TransferError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn debit_may_go_negative_inside_session() {
        let store = InMemoryDocumentStore::new();
        let accounts = AccountStore::new(store.clone());
        accounts
            .open_account("A", Money::from_cents(10))
            .await
            .unwrap();

        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        let account = accounts
            .debit(&mut session, &"A".into(), Money::from_cents(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, Money::from_cents(-20));
        session.abort_transaction().await.unwrap();

        let committed = accounts.get(&"A".into()).await.unwrap().unwrap();
        assert_eq!(committed.balance, Money::from_cents(10));
    }

    #[tokio::test]
    async fn credit_missing_account_returns_none() {
        let store = InMemoryDocumentStore::new();
        let accounts = AccountStore::new(store.clone());
        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        let result = accounts
            .credit(&mut session, &"nope".into(), Money::from_cents(1))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn list_and_total_balance() {
        let accounts = AccountStore::new(InMemoryDocumentStore::new());
        accounts
            .open_account("B", Money::from_cents(50))
            .await
            .unwrap();
        accounts
            .open_account("A", Money::from_cents(100))
            .await
            .unwrap();

        let listed = accounts.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].account_number.as_str(), "A");
        assert_eq!(
            accounts.total_balance().await.unwrap(),
            Money::from_cents(150)
        );
    }
}
