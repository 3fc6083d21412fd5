//! Capped exponential backoff.
//!
//! Delay doubles per attempt from `initial` up to `max`. A bounded random
//! jitter (at most a quarter of the delay) spreads out reconnect storms when
//! a Regional node restarts and all of its Edge children retry together.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// First delay.
    pub initial: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
    /// Apply up to 25% random jitter.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(300),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Policy with jitter disabled, for deterministic schedules.
    #[must_use]
    pub fn fixed(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            jitter: false,
        }
    }
}

/// Retry counter driven by a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: u32,
}

impl Backoff {
    /// Fresh counter.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt; advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);

        if !self.policy.jitter || base.is_zero() {
            return base;
        }
        let spread = base.as_millis().min(u128::from(u64::MAX)) as u64 / 4;
        let jitter = rand::thread_rng().gen_range(0..=spread);
        (base + Duration::from_millis(jitter)).min(self.policy.max)
    }

    /// Back to the initial delay after a successful attempt.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.policy
            .initial
            .checked_mul(factor)
            .unwrap_or(self.policy.max)
            .min(self.policy.max)
    }
}
