use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    BulkWriteResult, Document, Increment, Result, StoreError,
    document::validate_increments,
    store::{DocumentStore, SessionId, StoreSession},
};

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

/// Maps a database error onto the store taxonomy.
///
/// Serialization failures and deadlocks mean a concurrent transaction won the
/// race, so they carry the transient label.
fn map_db_error(error: sqlx::Error, collection: &str, key: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = error {
        match db_err.code().as_deref() {
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                return StoreError::TransactionConflict(db_err.message().to_string());
            }
            Some(UNIQUE_VIOLATION) => {
                return StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    key: key.to_string(),
                };
            }
            _ => {}
        }
    }
    StoreError::Database(error)
}

fn row_to_document(row: PgRow) -> Result<Document> {
    Ok(Document::new(
        row.try_get::<String, _>("key")?,
        row.try_get("body")?,
    ))
}

/// PostgreSQL-backed document store.
///
/// Documents live in a single JSONB table. Transactions run at REPEATABLE
/// READ, so a concurrent update of the same row fails with a serialization
/// error that is surfaced as a transient conflict.
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
    next_session: Arc<AtomicU64>,
}

impl PostgresDocumentStore {
    /// Creates a new PostgreSQL document store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            next_session: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Connects to `database_url` and wraps the pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    type Session = PostgresSession;

    async fn start_session(&self) -> Result<PostgresSession> {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1);
        Ok(PostgresSession {
            id,
            pool: self.pool.clone(),
            tx: None,
            ended: false,
        })
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        sqlx::query("INSERT INTO documents (collection, key, body) VALUES ($1, $2, $3)")
            .bind(collection)
            .bind(&document.key)
            .bind(&document.body)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, collection, &document.key))?;
        Ok(())
    }

    async fn find_one(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT key, body FROM documents WHERE collection = $1 AND key = $2")
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_document).transpose()
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT key, body FROM documents WHERE collection = $1 ORDER BY key")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_document).collect()
    }

    async fn sum_field(&self, collection: &str, field: &str) -> Result<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM((body->>$2)::BIGINT), 0)::BIGINT FROM documents WHERE collection = $1",
        )
        .bind(collection)
        .bind(field)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }
}

/// Session on a [`PostgresDocumentStore`].
///
/// Each transaction holds one pooled connection. Dropping an open
/// transaction rolls it back and returns the connection to the pool.
pub struct PostgresSession {
    id: SessionId,
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
    ended: bool,
}

impl PostgresSession {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        if self.ended {
            return Err(StoreError::SessionEnded);
        }
        self.tx.as_mut().ok_or(StoreError::NoTransaction)
    }
}

#[async_trait]
impl StoreSession for PostgresSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    async fn start_transaction(&mut self) -> Result<()> {
        if self.ended {
            return Err(StoreError::SessionEnded);
        }
        if self.tx.is_some() {
            return Err(StoreError::TransactionInProgress);
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;
        self.tx = Some(tx);
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        if self.ended {
            return Err(StoreError::SessionEnded);
        }
        let tx = self.tx.take().ok_or(StoreError::NoTransaction)?;
        tx.commit()
            .await
            .map_err(|e| map_db_error(e, "documents", "*"))
    }

    async fn abort_transaction(&mut self) -> Result<()> {
        if self.ended {
            return Err(StoreError::SessionEnded);
        }
        let tx = self.tx.take().ok_or(StoreError::NoTransaction)?;
        tx.rollback().await?;
        Ok(())
    }

    fn end_session(&mut self) {
        if self.tx.take().is_some() {
            tracing::debug!(session = %self.id, "open transaction rolled back on session end");
        }
        self.ended = true;
    }

    async fn find_one(&mut self, collection: &str, key: &str) -> Result<Option<Document>> {
        let tx = self.tx()?;
        let row = sqlx::query("SELECT key, body FROM documents WHERE collection = $1 AND key = $2")
            .bind(collection)
            .bind(key)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_db_error(e, collection, key))?;
        row.map(row_to_document).transpose()
    }

    async fn increment(
        &mut self,
        collection: &str,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<Document>> {
        let tx = self.tx()?;
        let row = sqlx::query(
            r#"
            UPDATE documents
            SET body = jsonb_set(body, ARRAY[$3::TEXT], to_jsonb(COALESCE((body->>$3)::BIGINT, 0) + $4)),
                version = version + 1,
                updated_at = NOW()
            WHERE collection = $1 AND key = $2
            RETURNING key, body
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(field)
        .bind(delta)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_db_error(e, collection, key))?;
        row.map(row_to_document).transpose()
    }

    async fn bulk_increment(
        &mut self,
        collection: &str,
        increments: &[Increment],
    ) -> Result<BulkWriteResult> {
        validate_increments(increments)?;
        let keys: Vec<String> = increments.iter().map(|op| op.key.clone()).collect();
        let fields: Vec<String> = increments.iter().map(|op| op.field.clone()).collect();
        let deltas: Vec<i64> = increments.iter().map(|op| op.delta).collect();

        let tx = self.tx()?;
        let rows = sqlx::query(
            r#"
            UPDATE documents AS d
            SET body = jsonb_set(d.body, ARRAY[u.field], to_jsonb(COALESCE((d.body->>u.field)::BIGINT, 0) + u.delta)),
                version = d.version + 1,
                updated_at = NOW()
            FROM UNNEST($2::TEXT[], $3::TEXT[], $4::BIGINT[]) AS u(key, field, delta)
            WHERE d.collection = $1 AND d.key = u.key
            RETURNING d.key, d.body
            "#,
        )
        .bind(collection)
        .bind(&keys)
        .bind(&fields)
        .bind(&deltas)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_db_error(e, collection, &keys.join(",")))?;

        let mut updated = rows
            .into_iter()
            .map(row_to_document)
            .collect::<Result<Vec<_>>>()?;

        let mut result = BulkWriteResult::default();
        for op in increments {
            let position = updated.iter().position(|doc| doc.key == op.key);
            let document = position.map(|i| updated.swap_remove(i));
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
        let tx = self.tx()?;
        for document in &documents {
            sqlx::query("INSERT INTO documents (collection, key, body) VALUES ($1, $2, $3)")
                .bind(collection)
                .bind(&document.key)
                .bind(&document.body)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_db_error(e, collection, &document.key))?;
        }
        Ok(())
    }

    async fn sum_field(&mut self, collection: &str, field: &str) -> Result<i64> {
        let tx = self.tx()?;
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM((body->>$2)::BIGINT), 0)::BIGINT FROM documents WHERE collection = $1",
        )
        .bind(collection)
        .bind(field)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_db_error(e, collection, "*"))?;
        Ok(sum)
    }
}
