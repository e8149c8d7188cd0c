//! Retry policy: decides backoff delays for rejected sends.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded retry with exponential backoff.
///
/// Used by [`Sender::send_with_retry`](crate::Sender::send_with_retry) when a
/// mailbox reports backpressure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of send attempts, including the first one.
    pub max_attempts: u32,

    /// Delay after the first rejection.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Same delay between every attempt.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Whether another attempt may follow `attempts` failed ones.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next attempt, given the number of attempts already
    /// made (1-indexed): `base_delay * multiplier^(attempts - 1)`, capped at
    /// `max_delay`.
    ///
    /// Example with base_delay=10ms, multiplier=2.0:
    /// - attempt 1: 10ms
    /// - attempt 2: 20ms
    /// - attempt 3: 40ms
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs.max(0.0))
    }
}
