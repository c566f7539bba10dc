//! # Exponential Backoff
//!
//! Per-item exponential backoff for requeueing failed work items.
//! Each key keeps its own failure count, so one broken object never slows
//! down the others. The delay for the n-th consecutive failure is
//! `base * 2^n`, capped at `max`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `base` and never exceeding `max`
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay for the given number of previous failures (stateless).
    ///
    /// Failure count 0 yields `base`, 1 yields `2 * base`, and so on.
    #[must_use]
    pub fn calculate_for_error_count(&self, error_count: u32) -> Duration {
        // Beyond 2^32 the cap has long been reached.
        let factor = 2u32.checked_pow(error_count).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Tracks consecutive failures per key
#[derive(Debug)]
pub struct ItemRateLimiter {
    backoff: ExponentialBackoff,
    failures: Mutex<HashMap<String, u32>>,
}

impl ItemRateLimiter {
    #[must_use]
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn when(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.to_string()).or_insert(0);
        let delay = self.backoff.calculate_for_error_count(*count);
        *count = count.saturating_add(1);
        delay
    }

    /// Reset the failure count of `key`
    pub fn forget(&self, key: &str) {
        self.failures.lock().remove(key);
    }

    /// Consecutive failures recorded for `key`
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10));

        assert_eq!(backoff.calculate_for_error_count(0), Duration::from_secs(1));
        assert_eq!(backoff.calculate_for_error_count(1), Duration::from_secs(2));
        assert_eq!(backoff.calculate_for_error_count(2), Duration::from_secs(4));
        assert_eq!(backoff.calculate_for_error_count(3), Duration::from_secs(8));
        // Capped
        assert_eq!(backoff.calculate_for_error_count(4), Duration::from_secs(10));
        assert_eq!(backoff.calculate_for_error_count(100), Duration::from_secs(10));
    }

    #[test]
    fn test_rate_limiter_is_per_key() {
        let limiter = ItemRateLimiter::new(ExponentialBackoff::new(
            Duration::from_millis(5),
            Duration::from_secs(1),
        ));

        assert_eq!(limiter.when("default/a"), Duration::from_millis(5));
        assert_eq!(limiter.when("default/a"), Duration::from_millis(10));
        assert_eq!(limiter.when("default/b"), Duration::from_millis(5));
        assert_eq!(limiter.num_requeues("default/a"), 2);
    }

    #[test]
    fn test_rate_limiter_forget() {
        let limiter = ItemRateLimiter::new(ExponentialBackoff::new(
            Duration::from_millis(5),
            Duration::from_secs(1),
        ));

        limiter.when("default/a");
        limiter.when("default/a");
        limiter.forget("default/a");

        // Should restart from the base delay after success
        assert_eq!(limiter.num_requeues("default/a"), 0);
        assert_eq!(limiter.when("default/a"), Duration::from_millis(5));
    }
}
