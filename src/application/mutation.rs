//! Speculative cache updates backed by an asynchronous write.
//!
//! A mutation installs its result in the cache before the content host has
//! seen it, then either confirms the entry with the committed value and
//! token or restores the snapshot it started from.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::DocumentCache;
use crate::domain::document::{ContentKey, Patch, VersionToken};

use super::error::{FailureCause, Operation, OperationError};
use super::writer::OptimisticWriter;

const SOURCE: &str = "application::mutation";

#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub id: Uuid,
    pub key: ContentKey,
    pub value: Value,
    pub token: VersionToken,
    pub attempts: u32,
}

/// A mutation whose speculative value is already visible in the cache.
#[derive(Debug)]
pub struct PendingMutation {
    pub id: Uuid,
    pub key: ContentKey,
    pub speculative: Value,
    handle: JoinHandle<Result<MutationOutcome, OperationError>>,
}

impl PendingMutation {
    /// Wait for the write to settle. The cache has already been confirmed
    /// or rolled back when this returns.
    pub async fn settle(self) -> Result<MutationOutcome, OperationError> {
        match self.handle.await {
            Ok(result) => result,
            Err(join) => Err(OperationError::new(
                Operation::Mutate,
                Some(self.key),
                0,
                FailureCause::Interrupted(join.to_string()),
            )),
        }
    }
}

pub struct MutationLayer {
    cache: Arc<DocumentCache>,
    writer: OptimisticWriter,
    key_locks: DashMap<ContentKey, Arc<AsyncMutex<()>>>,
    serialize_per_key: bool,
}

impl MutationLayer {
    pub fn new(cache: Arc<DocumentCache>, writer: OptimisticWriter) -> Self {
        let serialize_per_key = cache.config().serialize_per_key;
        Self {
            cache,
            writer,
            key_locks: DashMap::new(),
            serialize_per_key,
        }
    }

    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    pub fn writer(&self) -> &OptimisticWriter {
        &self.writer
    }

    /// Apply `patch` speculatively and wait for the write to settle.
    pub async fn mutate<P>(
        &self,
        key: &ContentKey,
        patch: P,
        description: impl Into<String>,
    ) -> Result<MutationOutcome, OperationError>
    where
        P: Patch + 'static,
    {
        self.begin(key, patch, description).await?.settle().await
    }

    /// Install the speculative value and start the write in the background.
    ///
    /// Fails without touching the cache when the current value cannot be
    /// read or the patch rejects it.
    pub async fn begin<P>(
        &self,
        key: &ContentKey,
        patch: P,
        description: impl Into<String>,
    ) -> Result<PendingMutation, OperationError>
    where
        P: Patch + 'static,
    {
        let id = Uuid::new_v4();
        let description = description.into();
        let patch: Arc<dyn Patch> = Arc::new(patch);
        let guard = self.acquire(key).await;

        let previous = self
            .cache
            .entry(key)
            .await
            .map_err(|err| err.with_operation(Operation::Mutate))?;
        let speculative = patch
            .apply(previous.as_ref().map(|entry| &entry.value))
            .map_err(|err| OperationError::rejected(Operation::Mutate, key, 0, err))?;

        self.cache
            .install_speculative(key, speculative.clone(), id, previous.clone());
        debug!(target = SOURCE, key = %key, mutation = %id, "Speculative value installed");

        let cache = Arc::clone(&self.cache);
        let writer = self.writer.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            match writer
                .write_with(&task_key, patch.as_ref(), &description)
                .await
            {
                Ok(committed) => {
                    cache.confirm(
                        &task_key,
                        Some(id),
                        committed.payload.clone(),
                        committed.token.clone(),
                    );
                    info!(
                        target = SOURCE,
                        key = %task_key,
                        mutation = %id,
                        attempts = committed.attempts,
                        "Mutation confirmed"
                    );
                    Ok(MutationOutcome {
                        id,
                        key: task_key,
                        value: committed.payload,
                        token: committed.token,
                        attempts: committed.attempts,
                    })
                }
                Err(err) => {
                    cache.rollback(&task_key, id, previous);
                    warn!(
                        target = SOURCE,
                        key = %task_key,
                        mutation = %id,
                        error = %err,
                        "Mutation failed; cache rolled back"
                    );
                    Err(err.with_operation(Operation::Mutate))
                }
            }
        });

        Ok(PendingMutation {
            id,
            key: key.clone(),
            speculative,
            handle,
        })
    }

    async fn acquire(&self, key: &ContentKey) -> Option<OwnedMutexGuard<()>> {
        if !self.serialize_per_key {
            return None;
        }
        let lock = self
            .key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        Some(lock.lock_owned().await)
    }
}
