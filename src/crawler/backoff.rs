//! Exponential backoff with full jitter
//!
//! Used for spacing retries of retriable fetch failures. Rate-limit waits do
//! not come from here; those honour Retry-After via the rate controller.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff policy: `base * 2^attempt`, capped, with full jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// The uncapped, unjittered delay for an attempt number
    fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let raw = self.base.saturating_mul(factor as u32);
        raw.min(self.cap)
    }

    /// A jittered delay for the given attempt, uniform in `(0, ceiling]`
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        let millis = ceiling.as_millis().max(1) as u64;
        let jittered = rand::thread_rng().gen_range(1..=millis);
        Duration::from_millis(jittered)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(60))
    }
}
