//! Bounded exponential backoff for push reconnects.

use std::time::Duration;

/// Reconnect schedule: `base * 2^(attempt-1)`, capped, plus optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures tolerated before the channel gives up.
    pub max_attempts: u32,
    /// Up to this fraction of the delay is added at random.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never retries.
    pub fn never() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Whether failure number `attempt` (1-based) may still be retried.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Delay before retrying after failure number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1_u32 << exp)
            .min(self.max_delay);

        if self.jitter <= 0.0 {
            return delay;
        }

        let jitter = delay.mul_f64(self.jitter * rand::random::<f64>());
        (delay + jitter).min(self.max_delay)
    }
}
