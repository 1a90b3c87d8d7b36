//! # Retry Policy
//!
//! Exponential backoff for failed deliveries.
//!
//! ```text
//! attempt k (1-based)     delay
//! ─────────────────────   ────────────────────────────
//!        1                base                 (5s)
//!        2                base * 2             (10s)
//!        3                base * 4             (20s)
//!        k                min(base * 2^(k-1), max)   (30s cap)
//! ```
//!
//! With a non-zero `jitter` each delay is drawn from `delay * (1 ± jitter)`
//! and still clamped to `max`.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;

use crate::config::DrainSettings;

/// Retry delays and attempt limit for the drain worker.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_settings(&DrainSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &DrainSettings) -> Self {
        RetryPolicy {
            base_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
            max_attempts: settings.max_attempts,
            jitter: settings.jitter,
        }
    }

    /// True if a task that has now failed `attempts` times gets another try.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next attempt after the `attempt`-th failure.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut backoff = self.create_backoff();
        let steps = attempt.clamp(1, 64);

        let mut delay = self.base_delay;
        for _ in 0..steps {
            match backoff.next_backoff() {
                Some(next) => delay = next,
                None => break,
            }
        }

        // Whole milliseconds keep persisted schedules exact.
        let delay = Duration::from_millis(delay.as_millis() as u64);
        delay.min(self.max_delay)
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.base_delay,
            max_interval: self.max_delay,
            multiplier: 2.0,
            randomization_factor: self.jitter,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_delays_are_monotonic_and_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(7),
            max_attempts: 20,
            jitter: 0.0,
        };

        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = policy.delay_for(attempt);
            let expected = (policy.base_delay * 2u32.pow(attempt - 1)).min(policy.max_delay);
            assert_eq!(delay, expected, "attempt {}", attempt);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::default()
        };

        for _ in 0..50 {
            let first = policy.delay_for(1);
            assert!(first >= Duration::from_millis(2_500));
            assert!(first <= Duration::from_millis(7_500));
            assert!(policy.delay_for(6) <= policy.max_delay);
        }
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
