//! Backoff policy: decides delays between repeated attempts.
//!
//! Used for task retries, result-recording retries and worker recovery
//! probes.

use std::time::Duration;

/// Exponential backoff with a ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// Default for task retries: 250ms, doubling, at most 10s.
    pub fn task_default() -> Self {
        Self::new(Duration::from_millis(250), 2.0, Duration::from_secs(10))
    }

    /// Default for result recording: 100ms, doubling, at most 5s.
    pub fn record_default() -> Self {
        Self::new(Duration::from_millis(100), 2.0, Duration::from_secs(5))
    }

    /// Default for worker recovery probes: 500ms, doubling, at most 30s.
    pub fn probe_default() -> Self {
        Self::new(Duration::from_millis(500), 2.0, Duration::from_secs(30))
    }

    /// Delay after `attempts` failures (1-indexed).
    ///
    /// delay = min(base_delay * multiplier^(attempts - 1), max_delay)
    ///
    /// Example with base_delay=250ms, multiplier=2.0, max_delay=1s:
    /// - attempt 1: 250ms
    /// - attempt 2: 500ms
    /// - attempt 3: 1s
    /// - attempt 4: 1s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();

        if !delay_secs.is_finite() || delay_secs >= max_secs {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::task_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[rstest]
    #[case(0, 250)]
    #[case(1, 250)]
    #[case(2, 500)]
    #[case(3, 1000)]
    #[case(4, 1000)]
    #[case(u32::MAX, 1000)]
    fn exponential_backoff_is_capped(#[case] attempts: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::new(Duration::from_millis(250), 2.0, Duration::from_secs(1));
        assert_eq!(policy.next_delay(attempts), Duration::from_millis(expected_ms));
    }

    #[test]
    fn exponential_backoff_increases_until_ceiling() {
        let policy = RetryPolicy::probe_default();

        let d1 = policy.next_delay(1);
        let d2 = policy.next_delay(2);
        let d3 = policy.next_delay(3);

        assert!(d2 > d1);
        assert!(d3 > d2);
        assert_eq!(policy.next_delay(50), Duration::from_secs(30));
    }
}
