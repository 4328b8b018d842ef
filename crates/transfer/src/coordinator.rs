//! Transfer coordinator driving whole-attempt retries.

use std::sync::Arc;
use std::time::Duration;

use common::{AccountNumber, Money, TransferId};
use document_store::DocumentStore;
use tokio::time::Instant;

use crate::account::AccountStore;
use crate::config::RetryPolicy;
use crate::engine::{TransferAttempt, TransferEngine, TransferMode, TransferResult, validate_request};
use crate::error::{Result, TransferError};
use crate::ledger::{AuditLedger, TransferRecord};
use crate::retry::{LabelClassifier, RetryClassifier};
use crate::session::TransactionSession;

/// Runs transfers to completion, retrying whole attempts on transient conflicts.
///
/// Every attempt gets a fresh [`TransactionSession`] that is ended on every
/// exit path. Fatal errors are returned as-is; a transient error on the last
/// permitted attempt becomes [`TransferError::RetriesExhausted`].
#[derive(Clone)]
pub struct TransferCoordinator<S> {
    store: S,
    engine: TransferEngine<S>,
    accounts: AccountStore<S>,
    ledger: AuditLedger<S>,
    policy: RetryPolicy,
    classifier: Arc<dyn RetryClassifier>,
}

impl<S: DocumentStore + Clone> TransferCoordinator<S> {
    /// Creates a coordinator running standard-mode transfers.
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        Self::with_mode(store, policy, TransferMode::default())
    }

    pub fn with_mode(store: S, policy: RetryPolicy, mode: TransferMode) -> Self {
        Self {
            engine: TransferEngine::new(store.clone(), mode),
            accounts: AccountStore::new(store.clone()),
            ledger: AuditLedger::new(store.clone()),
            store,
            policy,
            classifier: Arc::new(LabelClassifier),
        }
    }

    /// Replaces the default label-based classifier.
    pub fn with_classifier(mut self, classifier: impl RetryClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn mode(&self) -> TransferMode {
        self.engine.mode()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn accounts(&self) -> &AccountStore<S> {
        &self.accounts
    }

    pub fn ledger(&self) -> &AuditLedger<S> {
        &self.ledger
    }

    /// Transfers `amount` using the policy's attempt limit.
    pub async fn transfer(
        &self,
        from: impl Into<AccountNumber>,
        to: impl Into<AccountNumber>,
        amount: Money,
    ) -> Result<TransferResult> {
        self.transfer_with_max_attempts(from, to, amount, self.policy.max_attempts)
            .await
    }

    /// Transfers `amount`, making at most `max_attempts` attempts.
    ///
    /// A limit of zero is treated as one.
    pub async fn transfer_with_max_attempts(
        &self,
        from: impl Into<AccountNumber>,
        to: impl Into<AccountNumber>,
        amount: Money,
        max_attempts: u32,
    ) -> Result<TransferResult> {
        let from = from.into();
        let to = to.into();
        let started = Instant::now();

        let outcome = self.run(from, to, amount, max_attempts.max(1)).await;

        metrics::histogram!("transfer_duration_seconds").record(started.elapsed().as_secs_f64());
        match &outcome {
            Ok(_) => metrics::counter!("transfers_completed_total").increment(1),
            Err(e) => metrics::counter!("transfers_failed_total", "reason" => e.kind()).increment(1),
        }
        outcome
    }

    #[tracing::instrument(
        skip(self),
        fields(mode = %self.engine.mode(), transfer_id = tracing::field::Empty)
    )]
    async fn run(
        &self,
        from: AccountNumber,
        to: AccountNumber,
        amount: Money,
        max_attempts: u32,
    ) -> Result<TransferResult> {
        validate_request(&from, &to, amount)?;

        let transfer_id = TransferId::new();
        tracing::Span::current().record("transfer_id", tracing::field::display(transfer_id));
        let deadline = self
            .policy
            .deadline
            .map(|limit| (Instant::now() + limit, limit));

        let mut attempts = 0;
        loop {
            if let Some((at, limit)) = deadline
                && Instant::now() >= at
            {
                tracing::warn!(attempts, "transfer deadline exceeded");
                return Err(TransferError::DeadlineExceeded {
                    attempts,
                    deadline: limit,
                });
            }

            attempts += 1;
            let attempt =
                TransferAttempt::new(transfer_id, from.clone(), to.clone(), amount, attempts);
            metrics::counter!("transfer_attempts_total", "mode" => self.engine.mode().as_str())
                .increment(1);

            let outcome = self.run_attempt(&attempt, deadline).await;

            let error = match outcome {
                Ok(mut result) => {
                    result.attempts = attempts;
                    tracing::info!(
                        %transfer_id,
                        from = %attempt.from,
                        to = %attempt.to,
                        amount = %amount,
                        attempts,
                        "transfer committed"
                    );
                    return Ok(result);
                }
                Err(error) => error,
            };

            if let TransferError::DeadlineExceeded { .. } = error {
                tracing::warn!(%transfer_id, attempts, "transfer deadline exceeded mid-attempt");
                return Err(error);
            }

            if !self.classifier.is_retryable(&error) {
                if error.is_business_rule() {
                    tracing::info!(%transfer_id, attempts, error = %error, "transfer refused");
                } else {
                    tracing::warn!(%transfer_id, attempts, error = %error, "transfer failed");
                }
                if self.policy.record_failures
                    && matches!(error, TransferError::InsufficientFunds { .. })
                {
                    self.record_failure(&attempt, &error).await;
                }
                return Err(error);
            }

            if attempts >= max_attempts {
                tracing::warn!(%transfer_id, attempts, error = %error, "transfer retries exhausted");
                return Err(TransferError::RetriesExhausted {
                    attempts,
                    last: Box::new(error),
                });
            }

            let mut delay = self.policy.backoff(attempts);
            if let Some((at, _)) = deadline {
                delay = delay.min(at.saturating_duration_since(Instant::now()));
            }
            metrics::counter!("transfer_retries_total").increment(1);
            tracing::warn!(
                %transfer_id,
                attempts,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "transient conflict, retrying transfer"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// One attempt in its own session. The session is aborted on failure and
    /// ended on every path.
    ///
    /// The deadline bounds starting the session and staging the writes. Once
    /// the commit is issued it runs to completion, so a transfer that landed
    /// is never reported as timed out.
    async fn run_attempt(
        &self,
        attempt: &TransferAttempt,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<TransferResult> {
        let mut session = TransactionSession::new(&self.store);
        let staged = match deadline {
            Some((at, limit)) => {
                match tokio::time::timeout_at(at, self.stage(attempt, &mut session)).await {
                    Ok(staged) => staged,
                    Err(_) => Err(TransferError::DeadlineExceeded {
                        attempts: attempt.attempt_number,
                        deadline: limit,
                    }),
                }
            }
            None => self.stage(attempt, &mut session).await,
        };

        let outcome = match staged {
            Ok(result) => session.commit().await.map(|()| result),
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            session.abort().await;
        }
        session.end();
        outcome
    }

    async fn stage(
        &self,
        attempt: &TransferAttempt,
        session: &mut TransactionSession<'_, S>,
    ) -> Result<TransferResult> {
        session.start().await?;
        self.engine.execute(attempt, session).await
    }

    /// Persists a `failed` record for a refused transfer in a fresh session.
    /// A write failure here is logged and does not replace the original error.
    async fn record_failure(&self, attempt: &TransferAttempt, error: &TransferError) {
        let record = TransferRecord::failed(attempt, self.engine.mode(), error.to_string());
        let mut session = TransactionSession::new(&self.store);
        let outcome = self.append_and_commit(&record, &mut session).await;
        if let Err(e) = &outcome {
            session.abort().await;
            tracing::warn!(transfer_id = %attempt.transfer_id, error = %e, "failed to record refused transfer");
        }
        session.end();
    }

    async fn append_and_commit(
        &self,
        record: &TransferRecord,
        session: &mut TransactionSession<'_, S>,
    ) -> Result<()> {
        session.start().await?;
        self.ledger.append(session.active()?, record).await?;
        session.commit().await
    }
}
