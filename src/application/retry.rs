use std::num::NonZeroU32;
use std::time::Duration;

use super::repos::StoreError;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_DELAY_MS: u64 = 1_000;

/// Bounded retry budget for compare-and-swap writes.
///
/// Conflicts and unavailability share the same budget; the delay between
/// attempts is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: NonZeroU32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: NonZeroU32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Whether a failure on attempt number `attempt` (1-based) warrants
    /// another try.
    pub fn should_retry(&self, attempt: u32, error: &StoreError) -> bool {
        error.is_retryable() && attempt < self.max_attempts.get()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::new(DEFAULT_MAX_ATTEMPTS).unwrap_or(NonZeroU32::MIN),
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
        }
    }
}

impl From<&crate::config::RetrySettings> for RetryPolicy {
    fn from(settings: &crate::config::RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            delay: settings.delay,
        }
    }
}
