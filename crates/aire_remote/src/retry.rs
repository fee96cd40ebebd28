//! Retry with exponential backoff.

use std::time::Duration;

use aire_config::RemoteConfig;
use rand::Rng;

/// How often and how patiently failed remote requests are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each retry.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Whether to spread delays by ±20%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Builds a policy from the `[remote_backend]` section.
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            ..Default::default()
        }
    }

    /// Total number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.8..=1.2)
        } else {
            capped
        };
        Duration::from_secs_f64(delay)
    }
}
