//! In-process content host and deploy hook.
//!
//! Backs the `memory` backend and the test suites. Both adapters count their
//! calls and can be told to fail, so retry and rollback paths can be driven
//! deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::application::repos::{
    ConnectionStatus, ContentRepo, DeployError, DeployHook, StoreError,
};
use crate::cache::lock::mutex_lock;
use crate::domain::document::{ContentKey, Document, VersionToken};

const SOURCE: &str = "infra::memory";

#[derive(Debug, Clone)]
struct StoredDocument {
    payload: Value,
    token: VersionToken,
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<ContentKey, StoredDocument>,
    revision: u64,
    reads: usize,
    writes: usize,
    commits: usize,
    descriptions: Vec<String>,
    forced_conflicts: u32,
    forced_unavailable: u32,
    foreign_writes: VecDeque<(ContentKey, Value)>,
    reject_credentials: bool,
    write_delay: Option<Duration>,
}

impl MemoryState {
    fn store(&mut self, key: &ContentKey, payload: Value) -> VersionToken {
        self.revision += 1;
        let token = VersionToken::new(format!("rev-{}", self.revision));
        self.documents.insert(
            key.clone(),
            StoredDocument {
                payload,
                token: token.clone(),
            },
        );
        token
    }
}

#[derive(Debug, Default)]
pub struct MemoryContentRepo {
    state: Mutex<MemoryState>,
}

impl MemoryContentRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a document outside the CAS protocol.
    pub fn insert(&self, key: &ContentKey, payload: Value) -> VersionToken {
        mutex_lock(&self.state, SOURCE, "insert").store(key, payload)
    }

    pub fn payload(&self, key: &ContentKey) -> Option<Value> {
        mutex_lock(&self.state, SOURCE, "payload")
            .documents
            .get(key)
            .map(|doc| doc.payload.clone())
    }

    pub fn token(&self, key: &ContentKey) -> Option<VersionToken> {
        mutex_lock(&self.state, SOURCE, "token")
            .documents
            .get(key)
            .map(|doc| doc.token.clone())
    }

    pub fn read_calls(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "read_calls").reads
    }

    /// Number of write requests received, accepted or not.
    pub fn write_calls(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "write_calls").writes
    }

    pub fn commit_count(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "commit_count").commits
    }

    /// Commit messages of accepted writes, oldest first.
    pub fn descriptions(&self) -> Vec<String> {
        mutex_lock(&self.state, SOURCE, "descriptions")
            .descriptions
            .clone()
    }

    /// Reject the next `count` writes with `Conflict` regardless of token.
    pub fn fail_next_writes_with_conflict(&self, count: u32) {
        mutex_lock(&self.state, SOURCE, "fail_conflict").forced_conflicts = count;
    }

    /// Reject the next `count` writes with `Unavailable`.
    pub fn fail_next_writes_unavailable(&self, count: u32) {
        mutex_lock(&self.state, SOURCE, "fail_unavailable").forced_unavailable = count;
    }

    /// Have another editor commit `payload` just before the next write is
    /// checked, so that write races a genuinely newer token.
    pub fn queue_foreign_write(&self, key: &ContentKey, payload: Value) {
        mutex_lock(&self.state, SOURCE, "queue_foreign_write")
            .foreign_writes
            .push_back((key.clone(), payload));
    }

    pub fn reject_credentials(&self, reject: bool) {
        mutex_lock(&self.state, SOURCE, "reject_credentials").reject_credentials = reject;
    }

    /// Delay every write by `delay` before it reaches the store.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        mutex_lock(&self.state, SOURCE, "set_write_delay").write_delay = delay;
    }
}

#[async_trait]
impl ContentRepo for MemoryContentRepo {
    async fn read(&self, key: &ContentKey) -> Result<Document, StoreError> {
        let mut state = mutex_lock(&self.state, SOURCE, "read");
        state.reads += 1;
        if state.reject_credentials {
            return Err(StoreError::auth("memory backend rejected credentials"));
        }
        state
            .documents
            .get(key)
            .map(|doc| Document {
                key: key.clone(),
                payload: doc.payload.clone(),
                token: doc.token.clone(),
            })
            .ok_or(StoreError::NotFound)
    }

    async fn write(
        &self,
        key: &ContentKey,
        payload: &Value,
        expected: Option<&VersionToken>,
        description: &str,
    ) -> Result<VersionToken, StoreError> {
        let delay = mutex_lock(&self.state, SOURCE, "write.delay").write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = mutex_lock(&self.state, SOURCE, "write");
        state.writes += 1;
        if state.reject_credentials {
            return Err(StoreError::auth("memory backend rejected credentials"));
        }
        if state.forced_unavailable > 0 {
            state.forced_unavailable -= 1;
            return Err(StoreError::unavailable("injected outage"));
        }
        if state.forced_conflicts > 0 {
            state.forced_conflicts -= 1;
            return Err(StoreError::Conflict);
        }
        if let Some((foreign_key, foreign_payload)) = state.foreign_writes.pop_front() {
            debug!(target = SOURCE, key = %foreign_key, "Applying foreign write");
            state.store(&foreign_key, foreign_payload);
        }

        let current = state.documents.get(key).map(|doc| &doc.token);
        if current != expected {
            return Err(StoreError::Conflict);
        }

        let token = state.store(key, payload.clone());
        state.commits += 1;
        state.descriptions.push(description.to_string());
        Ok(token)
    }

    async fn verify(&self) -> ConnectionStatus {
        if mutex_lock(&self.state, SOURCE, "verify").reject_credentials {
            ConnectionStatus::InvalidToken
        } else {
            ConnectionStatus::Connected
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryDeployHook {
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MemoryDeployHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *mutex_lock(&self.delay, SOURCE, "deploy.set_delay") = delay;
    }
}

#[async_trait]
impl DeployHook for MemoryDeployHook {
    async fn trigger(&self) -> Result<(), DeployError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *mutex_lock(&self.delay, SOURCE, "deploy.trigger");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeployError::unavailable("injected deploy failure"));
        }
        Ok(())
    }
}
