//! Exponential backoff for reconnection attempts
//!
//! Tracks how many connection cycles have failed and computes the delay
//! before the next retry. The counter resets on a successful handshake and
//! when an explicit `connect()` starts a fresh budget.

use std::time::Duration;

/// Retry policy knobs.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum failed cycles before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor applied per recorded failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            multiplier: 1.5,
        }
    }
}

/// Backoff state for one connection lifecycle.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff with zero recorded failures.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Record a failed cycle and return the delay before the next retry.
    ///
    /// Returns `None` once the budget is exhausted; the counter does not
    /// advance past `max_attempts`. The delay for the first retry equals
    /// `base_delay`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let delay = self
            .policy
            .base_delay
            .mul_f64(self.policy.multiplier.powi(self.attempt as i32));
        self.attempt += 1;
        Some(delay)
    }

    /// Number of failures recorded so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Clear the failure counter.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
