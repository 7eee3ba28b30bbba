use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per batch item, the first call included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomises each delay within [half, full] so concurrent batches do not retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8000),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }

    /// Delay before the next attempt, after `failed_attempts` failures (1-based).
    /// Doubles per failure: base, 2×base, 4×base, capped at `max_delay`.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        let full = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if !self.jitter {
            return full;
        }
        let half_ms = (full.as_millis() / 2) as u64;
        let full_ms = full.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(half_ms..=full_ms))
    }
}
