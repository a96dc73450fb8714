//! Cache configuration.
//!
//! Staleness windows per key class, LRU capacity and same-key mutation
//! ordering.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::domain::document::ContentKey;

use super::keys::KeyClass;

const DEFAULT_STANDARD_STALE_SECS: u64 = 60;
const DEFAULT_STABLE_STALE_SECS: u64 = 300;
const DEFAULT_CAPACITY: usize = 64;

/// Keys that change rarely and tolerate a longer staleness window.
pub const DEFAULT_STABLE_KEYS: &[&str] = &[
    "about",
    "experience",
    "testimonials",
    "hard-skills",
    "contact",
    "running-text",
];

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Staleness window for ordinary documents.
    pub standard_stale: Duration,
    /// Staleness window for documents in `stable_keys`.
    pub stable_stale: Duration,
    pub stable_keys: Vec<String>,
    /// Maximum number of cached documents.
    pub capacity: usize,
    /// Run same-key mutations one at a time.
    pub serialize_per_key: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            standard_stale: Duration::from_secs(DEFAULT_STANDARD_STALE_SECS),
            stable_stale: Duration::from_secs(DEFAULT_STABLE_STALE_SECS),
            stable_keys: DEFAULT_STABLE_KEYS.iter().map(|key| key.to_string()).collect(),
            capacity: DEFAULT_CAPACITY,
            serialize_per_key: false,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            standard_stale: settings.standard_stale,
            stable_stale: settings.stable_stale,
            stable_keys: settings.stable_keys.clone(),
            capacity: settings.capacity,
            serialize_per_key: settings.serialize_per_key,
        }
    }
}

impl CacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn class_of(&self, key: &ContentKey) -> KeyClass {
        KeyClass::of(key, &self.stable_keys)
    }

    pub fn stale_after(&self, key: &ContentKey) -> Duration {
        match self.class_of(key) {
            KeyClass::Standard => self.standard_stale,
            KeyClass::Stable => self.stable_stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> ContentKey {
        ContentKey::new(raw).expect("key")
    }

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.standard_stale, Duration::from_secs(60));
        assert_eq!(config.stable_stale, Duration::from_secs(300));
        assert_eq!(config.capacity, 64);
        assert!(!config.serialize_per_key);
        assert!(config.stable_keys.iter().any(|k| k == "testimonials"));
    }

    #[test]
    fn staleness_follows_key_class() {
        let config = CacheConfig::default();
        assert_eq!(config.stale_after(&key("projects")), Duration::from_secs(60));
        assert_eq!(config.stale_after(&key("about")), Duration::from_secs(300));
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.capacity_non_zero().get(), 1);
    }
}
