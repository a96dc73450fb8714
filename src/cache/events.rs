//! Cache event broadcasting.
//!
//! Every change to the document cache is published with a unique id and a
//! monotonic epoch so subscribers (UI adapters, tests) can follow the
//! speculative → confirmed / rolled back lifecycle of each key.

use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::domain::document::ContentKey;

const CHANNEL_CAPACITY: usize = 256;

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier (UUIDv4).
    pub id: Uuid,
    pub epoch: Epoch,
    pub key: ContentKey,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(key: ContentKey, kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            key,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A confirmed value was read from the content host.
    Fetched,
    /// A speculative value was installed ahead of its write.
    Speculative { mutation: Uuid },
    /// A write settled successfully and its value is now confirmed.
    Confirmed { mutation: Option<Uuid> },
    /// A write failed and the pre-mutation snapshot was restored.
    RolledBack { mutation: Uuid },
    /// The entry was dropped on request.
    Invalidated,
    /// The entry was dropped to stay within capacity.
    Evicted,
}

pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
    epoch_counter: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Publish an event; events with no subscriber are dropped.
    pub fn publish(&self, key: &ContentKey, kind: EventKind) {
        let event = CacheEvent::new(key.clone(), kind, self.next_epoch());
        debug!(
            event_id = %event.id,
            event_epoch = event.epoch,
            key = %event.key,
            event_kind = ?event.kind,
            "Cache event published"
        );
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ContentKey {
        ContentKey::new("projects").expect("key")
    }

    #[test]
    fn epochs_are_monotonic() {
        let bus = EventBus::new();
        let e1 = bus.next_epoch();
        let e2 = bus.next_epoch();
        assert!(e1 < e2);
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(&key(), EventKind::Fetched);
        bus.publish(&key(), EventKind::Invalidated);

        let first = rx.recv().await.expect("first event");
        let second = rx.recv().await.expect("second event");
        assert_eq!(first.kind, EventKind::Fetched);
        assert_eq!(second.kind, EventKind::Invalidated);
        assert!(first.epoch < second.epoch);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.publish(&key(), EventKind::Evicted);
    }
}
