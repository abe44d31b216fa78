use chrono::Duration;
use remindhub_core::config::RetryConfig;

/// Exponential backoff for retryable delivery failures.
///
/// Schedule: base → 2·base → 4·base → … capped at `max_delay`, for at most
/// `max_attempts` delivery attempts per occurrence.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Whether another attempt is allowed after `failed_attempts` failures.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }

    /// Delay before the next attempt, given how many attempts have failed so far (>= 1).
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(30);
        let factor = 1i32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            Duration::seconds(config.base_delay_secs as i64),
            Duration::seconds(config.max_delay_secs as i64),
            config.max_attempts,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_then_cap() {
        let policy = RetryPolicy::new(Duration::seconds(30), Duration::seconds(100), 10);
        assert_eq!(policy.delay_for(1), Duration::seconds(30));
        assert_eq!(policy.delay_for(2), Duration::seconds(60));
        assert_eq!(policy.delay_for(3), Duration::seconds(100));
        assert_eq!(policy.delay_for(40), Duration::seconds(100));
    }

    #[test]
    fn attempt_budget() {
        let policy = RetryPolicy::new(Duration::seconds(1), Duration::seconds(10), 3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn zero_attempts_is_raised_to_one() {
        let policy = RetryPolicy::new(Duration::seconds(1), Duration::seconds(10), 0);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.should_retry(1));
    }
}
