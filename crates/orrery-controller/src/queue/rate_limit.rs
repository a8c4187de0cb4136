//! Per-key exponential backoff.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;

/// Tracks consecutive failures per key and turns them into retry delays.
///
/// The delay for the `n`th failure is `base * 2^n`, capped at `max`.
#[derive(Debug)]
pub struct ExponentialBackoff<K: Eq + Hash> {
    failures: DashMap<K, u32>,
    base: Duration,
    max: Duration,
}

impl<K: Eq + Hash + Clone> ExponentialBackoff<K> {
    /// Create a limiter with the given base and maximum delay.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            failures: DashMap::new(),
            base,
            max,
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying.
    pub fn when(&self, key: &K) -> Duration {
        let exp = {
            let mut entry = self.failures.entry(key.clone()).or_insert(0);
            let exp = *entry;
            *entry = entry.saturating_add(1);
            exp
        };

        2u32.checked_pow(exp)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Number of failures recorded for `key` since it was last forgotten.
    #[must_use]
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).map_or(0, |n| *n)
    }

    /// Clear the failure count for `key`.
    pub fn forget(&self, key: &K) {
        self.failures.remove(key);
    }
}
