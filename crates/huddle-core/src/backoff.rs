use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Floor for every delay. A zero setting must still pause between retries.
pub const MIN_BACKOFF_MS: u64 = 10;

/// Reconnect delay policy: exponential doubling from `initial_ms`, capped at
/// `max_ms`. Delays never decrease as the attempt number grows and never go
/// below [`MIN_BACKOFF_MS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        let initial_ms = initial_ms.max(MIN_BACKOFF_MS);
        Self {
            initial_ms,
            max_ms: max_ms.max(initial_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based; 0 is treated as 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        // Fields are public and deserializable, so clamp here as well.
        let initial = self.initial_ms.max(MIN_BACKOFF_MS);
        let exp = attempt.saturating_sub(1).min(32);
        let ms = initial.saturating_mul(1u64 << exp).min(self.max_ms.max(initial));
        Duration::from_millis(ms)
    }
}
