//! Read-through document cache.
//!
//! One entry per content key, bounded by LRU capacity. Confirmed entries
//! expire after the staleness window of their key class; speculative
//! entries are served until their mutation settles.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashSet;
use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::error::{Operation, OperationError};
use crate::application::repos::{ContentRepo, StoreError};
use crate::domain::document::{ContentKey, VersionToken};

use super::config::CacheConfig;
use super::events::{CacheEvent, EventBus, EventKind};
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

#[derive(Debug, Clone, PartialEq)]
pub enum EntryState {
    Confirmed,
    /// Installed ahead of a pending write. `previous` is the snapshot the
    /// mutation started from (`None` when the document was absent).
    Speculative {
        mutation: Uuid,
        previous: Option<Box<CacheEntry>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: ContentKey,
    pub value: Value,
    /// Token of the last confirmed bytes this entry derives from.
    pub token: Option<VersionToken>,
    pub fetched_at: Instant,
    pub stale_after: Duration,
    pub state: EntryState,
}

impl CacheEntry {
    pub fn is_speculative(&self) -> bool {
        matches!(self.state, EntryState::Speculative { .. })
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        !self.is_speculative() && now.saturating_duration_since(self.fetched_at) >= self.stale_after
    }
}

pub struct DocumentCache {
    entries: Mutex<LruCache<ContentKey, CacheEntry>>,
    repo: Arc<dyn ContentRepo>,
    config: CacheConfig,
    events: EventBus,
    // Mutations whose speculative value has not settled yet.
    pending: DashSet<Uuid>,
}

impl DocumentCache {
    pub fn new(repo: Arc<dyn ContentRepo>, config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.capacity_non_zero())),
            repo,
            config,
            events: EventBus::new(),
            pending: DashSet::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Current value of `key`, reading through to the content host when the
    /// cached copy is missing or stale.
    pub async fn get(&self, key: &ContentKey) -> Result<Value, OperationError> {
        self.entry(key)
            .await?
            .map(|entry| entry.value)
            .ok_or_else(|| OperationError::store(Operation::Read, key, 1, StoreError::NotFound))
    }

    /// Like [`get`](Self::get) but returns the whole entry, and `None` when
    /// the document does not exist.
    pub async fn entry(&self, key: &ContentKey) -> Result<Option<CacheEntry>, OperationError> {
        if let Some(entry) = self.fresh(key) {
            counter!("folio_cache_hit_total").increment(1);
            return Ok(Some(entry));
        }
        counter!("folio_cache_miss_total").increment(1);

        let document = match self.repo.read(key).await {
            Ok(document) => document,
            Err(StoreError::NotFound) => {
                let mut entries = mutex_lock(&self.entries, SOURCE, "entry.not_found");
                if let Some(current) = entries.peek(key).filter(|entry| self.awaiting_write(entry)) {
                    return Ok(Some(current.clone()));
                }
                entries.pop(key);
                return Ok(None);
            }
            Err(err) => return Err(OperationError::store(Operation::Read, key, 1, err)),
        };

        let entry = CacheEntry {
            key: key.clone(),
            value: document.payload,
            token: Some(document.token),
            fetched_at: Instant::now(),
            stale_after: self.config.stale_after(key),
            state: EntryState::Confirmed,
        };

        let evicted = {
            let mut entries = mutex_lock(&self.entries, SOURCE, "entry.fill");
            // A mutation installed while we were fetching wins over the read.
            if let Some(current) = entries.peek(key).filter(|entry| self.awaiting_write(entry)) {
                return Ok(Some(current.clone()));
            }
            push_entry(&mut entries, entry.clone())
        };

        self.events.publish(key, EventKind::Fetched);
        self.record_eviction(evicted);
        Ok(Some(entry))
    }

    /// Cached entry without touching the content host or staleness.
    pub fn peek(&self, key: &ContentKey) -> Option<CacheEntry> {
        mutex_lock(&self.entries, SOURCE, "peek").peek(key).cloned()
    }

    /// Compute a derived view from the canonical value. Views are never
    /// cached.
    pub async fn view<T, F>(&self, key: &ContentKey, project: F) -> Result<T, OperationError>
    where
        F: FnOnce(&Value) -> T,
    {
        let value = self.get(key).await?;
        Ok(project(&value))
    }

    pub fn install_speculative(
        &self,
        key: &ContentKey,
        value: Value,
        mutation: Uuid,
        previous: Option<CacheEntry>,
    ) {
        let token = previous.as_ref().and_then(|entry| entry.token.clone());
        let entry = CacheEntry {
            key: key.clone(),
            value,
            token,
            fetched_at: Instant::now(),
            stale_after: self.config.stale_after(key),
            state: EntryState::Speculative {
                mutation,
                previous: previous.map(Box::new),
            },
        };
        self.pending.insert(mutation);
        self.store(entry);
        self.events.publish(key, EventKind::Speculative { mutation });
    }

    /// Replace the entry with a value the content host has accepted.
    pub fn confirm(
        &self,
        key: &ContentKey,
        mutation: Option<Uuid>,
        value: Value,
        token: VersionToken,
    ) {
        let entry = CacheEntry {
            key: key.clone(),
            value,
            token: Some(token),
            fetched_at: Instant::now(),
            stale_after: self.config.stale_after(key),
            state: EntryState::Confirmed,
        };
        if let Some(mutation) = mutation {
            self.pending.remove(&mutation);
        }
        self.store(entry);
        self.events.publish(key, EventKind::Confirmed { mutation });
    }

    /// Undo a failed mutation.
    ///
    /// Only the mutation's own speculative entry is replaced; anything
    /// installed or confirmed since then is kept. `previous` is restored
    /// exactly, skipping snapshots left by mutations that have already
    /// settled. The entry is dropped when nothing older remains.
    pub fn rollback(&self, key: &ContentKey, mutation: Uuid, previous: Option<CacheEntry>) {
        self.pending.remove(&mutation);
        let previous = self.unsettled(previous);

        let (restored, evicted) = {
            let mut entries = mutex_lock(&self.entries, SOURCE, "rollback");
            let owned = matches!(
                entries.peek(key).map(|entry| &entry.state),
                Some(EntryState::Speculative { mutation: current, .. }) if *current == mutation
            );
            match (owned, previous) {
                (false, _) => (false, None),
                (true, Some(entry)) => (true, push_entry(&mut entries, entry)),
                (true, None) => {
                    entries.pop(key);
                    (true, None)
                }
            }
        };

        if restored {
            warn!(target = SOURCE, key = %key, %mutation, "Speculative entry rolled back");
        } else {
            debug!(
                target = SOURCE,
                key = %key,
                %mutation,
                "Failed mutation was superseded; keeping the newer entry"
            );
        }
        self.record_eviction(evicted);
        self.events.publish(key, EventKind::RolledBack { mutation });
    }

    pub fn invalidate(&self, key: &ContentKey) {
        if mutex_lock(&self.entries, SOURCE, "invalidate")
            .pop(key)
            .is_some()
        {
            self.events.publish(key, EventKind::Invalidated);
        }
    }

    pub fn invalidate_all(&self) {
        let drained: Vec<ContentKey> = {
            let mut entries = mutex_lock(&self.entries, SOURCE, "invalidate_all");
            let keys = entries.iter().map(|(key, _)| key.clone()).collect();
            entries.clear();
            keys
        };
        for key in drained {
            self.events.publish(&key, EventKind::Invalidated);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fresh(&self, key: &ContentKey) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "fresh");
        match entries.get(key) {
            Some(entry) if self.servable(entry, now) => Some(entry.clone()),
            Some(_) => {
                debug!(target = SOURCE, key = %key, "Cached entry is stale");
                None
            }
            None => None,
        }
    }

    /// Speculative entries are served while their mutation is in flight,
    /// confirmed ones until their staleness window passes.
    fn servable(&self, entry: &CacheEntry, now: Instant) -> bool {
        match &entry.state {
            EntryState::Speculative { .. } => self.awaiting_write(entry),
            EntryState::Confirmed => !entry.is_stale(now),
        }
    }

    fn awaiting_write(&self, entry: &CacheEntry) -> bool {
        match &entry.state {
            EntryState::Speculative { mutation, .. } => self.pending.contains(mutation),
            EntryState::Confirmed => false,
        }
    }

    /// Walk back past speculative snapshots whose mutation has settled.
    fn unsettled(&self, mut previous: Option<CacheEntry>) -> Option<CacheEntry> {
        loop {
            let settled = match previous.as_ref().map(|entry| &entry.state) {
                Some(EntryState::Speculative { mutation, .. }) => !self.pending.contains(mutation),
                _ => false,
            };
            if !settled {
                return previous;
            }
            previous = match previous.map(|entry| entry.state) {
                Some(EntryState::Speculative { previous: earlier, .. }) => {
                    earlier.map(|entry| *entry)
                }
                _ => None,
            };
        }
    }

    fn store(&self, entry: CacheEntry) {
        let evicted = push_entry(&mut mutex_lock(&self.entries, SOURCE, "store"), entry);
        self.record_eviction(evicted);
    }

    fn record_eviction(&self, evicted: Option<ContentKey>) {
        if let Some(evicted) = evicted {
            counter!("folio_cache_evict_total").increment(1);
            self.events.publish(&evicted, EventKind::Evicted);
        }
    }
}

/// Insert `entry`, returning the key pushed out by capacity, if any.
fn push_entry(
    entries: &mut LruCache<ContentKey, CacheEntry>,
    entry: CacheEntry,
) -> Option<ContentKey> {
    let key = entry.key.clone();
    entries
        .push(key.clone(), entry)
        .map(|(evicted, _)| evicted)
        .filter(|evicted| *evicted != key)
}
