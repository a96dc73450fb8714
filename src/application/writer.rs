//! Compare-and-swap writes with a bounded re-read/re-apply loop.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::domain::document::{ContentKey, Document, Patch, VersionToken};
use crate::domain::error::DomainError;

use super::error::{Operation, OperationError};
use super::repos::{ContentRepo, StoreError};
use super::retry::RetryPolicy;

const SOURCE: &str = "application::writer";

/// A write accepted by the content host.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub key: ContentKey,
    pub payload: Value,
    pub token: VersionToken,
    pub attempts: u32,
}

enum AttemptError {
    Store(StoreError),
    Rejected(DomainError),
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

#[derive(Clone)]
pub struct OptimisticWriter {
    repo: Arc<dyn ContentRepo>,
    policy: RetryPolicy,
}

impl OptimisticWriter {
    pub fn new(repo: Arc<dyn ContentRepo>, policy: RetryPolicy) -> Self {
        Self { repo, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn repo(&self) -> &Arc<dyn ContentRepo> {
        &self.repo
    }

    /// Read the current document, mapping a missing document to `None`.
    pub async fn read(&self, key: &ContentKey) -> Result<Option<Document>, OperationError> {
        read_current(self.repo.as_ref(), key)
            .await
            .map_err(|err| OperationError::store(Operation::Read, key, 1, err))
    }

    /// Apply `patch` to the freshest payload and write it, retrying on
    /// conflict or unavailability within the policy budget.
    pub async fn write_with(
        &self,
        key: &ContentKey,
        patch: &dyn Patch,
        description: &str,
    ) -> Result<Committed, OperationError> {
        self.run(key, None, patch, description).await
    }

    /// Like [`write_with`](Self::write_with), but the first attempt uses a
    /// base the caller has just read instead of reading again.
    pub async fn write_from(
        &self,
        key: &ContentKey,
        base: Option<Document>,
        patch: &dyn Patch,
        description: &str,
    ) -> Result<Committed, OperationError> {
        self.run(key, Some(base), patch, description).await
    }

    async fn run(
        &self,
        key: &ContentKey,
        mut prefetched: Option<Option<Document>>,
        patch: &dyn Patch,
        description: &str,
    ) -> Result<Committed, OperationError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            counter!("folio_write_attempt_total").increment(1);

            let base = prefetched.take();
            match self.attempt(key, base, patch, description).await {
                Ok((payload, token)) => {
                    histogram!("folio_write_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
                    info!(
                        target = SOURCE,
                        key = %key,
                        token = %token,
                        attempts = attempt,
                        description,
                        "Document committed"
                    );
                    return Ok(Committed {
                        key: key.clone(),
                        payload,
                        token,
                        attempts: attempt,
                    });
                }
                Err(AttemptError::Rejected(err)) => {
                    debug!(
                        target = SOURCE,
                        key = %key,
                        attempts = attempt,
                        error = %err,
                        "Patch rejected current payload"
                    );
                    return Err(OperationError::rejected(Operation::Write, key, attempt, err));
                }
                Err(AttemptError::Store(err)) => {
                    if matches!(err, StoreError::Conflict) {
                        counter!("folio_write_conflict_total").increment(1);
                    }
                    if self.policy.should_retry(attempt, &err) {
                        warn!(
                            target = SOURCE,
                            key = %key,
                            attempt,
                            max_attempts = self.policy.max_attempts.get(),
                            delay_ms = u64::try_from(self.policy.delay.as_millis()).unwrap_or(u64::MAX),
                            error = %err,
                            "Write attempt failed; retrying against a fresh token"
                        );
                        tokio::time::sleep(self.policy.delay).await;
                        continue;
                    }
                    error!(
                        target = SOURCE,
                        key = %key,
                        attempts = attempt,
                        error = %err,
                        "Write failed"
                    );
                    return Err(OperationError::store(Operation::Write, key, attempt, err));
                }
            }
        }
    }

    async fn attempt(
        &self,
        key: &ContentKey,
        prefetched: Option<Option<Document>>,
        patch: &dyn Patch,
        description: &str,
    ) -> Result<(Value, VersionToken), AttemptError> {
        let base = match prefetched {
            Some(base) => base,
            None => read_current(self.repo.as_ref(), key).await?,
        };

        let (current, expected) = match &base {
            Some(document) => (Some(&document.payload), Some(&document.token)),
            None => (None, None),
        };

        let payload = patch.apply(current).map_err(AttemptError::Rejected)?;
        let token = self
            .repo
            .write(key, &payload, expected, description)
            .await?;
        Ok((payload, token))
    }
}

async fn read_current(
    repo: &dyn ContentRepo,
    key: &ContentKey,
) -> Result<Option<Document>, StoreError> {
    match repo.read(key).await {
        Ok(document) => Ok(Some(document)),
        Err(StoreError::NotFound) => Ok(None),
        Err(err) => Err(err),
    }
}
