//! Client-side document cache.
//!
//! A single read-through cache shared by every consumer in the process:
//!
//! - **Confirmed entries** mirror what the content host last returned or
//!   accepted, and expire after the staleness window of their key class.
//! - **Speculative entries** hold a value whose write is still in flight,
//!   together with the snapshot needed to roll it back.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! standard_stale_seconds = 60
//! stable_stale_seconds = 300
//! stable_keys = ["about", "experience", "testimonials"]
//! capacity = 64
//! serialize_per_key = false
//! ```

mod config;
mod events;
mod keys;
pub(crate) mod lock;
mod store;

pub use config::{CacheConfig, DEFAULT_STABLE_KEYS};
pub use events::{CacheEvent, Epoch, EventBus, EventKind};
pub use keys::KeyClass;
pub use store::{CacheEntry, DocumentCache, EntryState};
