//! Bounded retry with exponential backoff for background jobs.

use finboard_core::config::JobsConfig;
use rand::Rng;
use std::time::Duration;

/// Jitter spreads delays over `[0.75 * d, 1.25 * d]`.
const JITTER_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, false)
    }

    pub fn from_config(config: &JobsConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
            config.jitter,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let mut secs = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        if self.jitter {
            let offset = JITTER_FACTOR * (rand::thread_rng().gen::<f64>() - 0.5);
            secs *= 1.0 + offset;
        }
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&JobsConfig::default())
    }
}
