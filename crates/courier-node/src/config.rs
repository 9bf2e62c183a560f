use std::time::Duration;

use crate::sender::RetryPolicy;

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// How long a handed-off exchange waits for its correlated reply.
    pub ack_timeout: Duration,
    /// Total send attempts before an exchange is reported as failed.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Factor applied to the delay after each further attempt.
    pub backoff_multiplier: u32,
    /// Upper bound on any single backoff delay.
    pub max_backoff: Duration,
    /// Delivered message ids remembered for duplicate suppression.
    ///
    /// Least recently delivered ids are evicted first. A redelivery of an
    /// evicted id is published again, so this must exceed the deliveries seen
    /// during one sender retry horizon.
    pub ledger_retention: usize,
    /// Resolved endpoint addresses kept by the caching repository.
    pub address_cache_capacity: usize,
    /// Also cache "not found" address lookups.
    pub cache_address_misses: bool,
    /// Capacity of the application publish channel.
    pub publish_buffer: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(30),
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 2,
            max_backoff: Duration::from_secs(60),
            ledger_retention: 100_000,
            address_cache_capacity: 1_024,
            cache_address_misses: false,
            publish_buffer: 256,
        }
    }
}

impl DeliveryConfig {
    /// Returns the sender retry policy derived from this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            ack_timeout: self.ack_timeout,
            max_attempts: self.max_attempts.max(1),
            initial_backoff: self.initial_backoff,
            backoff_multiplier: self.backoff_multiplier.max(1),
            max_backoff: self.max_backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::DeliveryConfig;

    #[test]
    fn retry_policy_reflects_config_fields() {
        let cfg = DeliveryConfig {
            ack_timeout: Duration::from_secs(5),
            max_attempts: 7,
            initial_backoff: Duration::from_millis(250),
            backoff_multiplier: 3,
            max_backoff: Duration::from_secs(9),
            ..DeliveryConfig::default()
        };

        let p = cfg.retry_policy();
        assert_eq!(p.ack_timeout, Duration::from_secs(5));
        assert_eq!(p.max_attempts, 7);
        assert_eq!(p.initial_backoff, Duration::from_millis(250));
        assert_eq!(p.backoff_multiplier, 3);
        assert_eq!(p.max_backoff, Duration::from_secs(9));
    }

    #[test]
    fn zero_attempts_and_multiplier_are_clamped() {
        let cfg = DeliveryConfig {
            max_attempts: 0,
            backoff_multiplier: 0,
            ..DeliveryConfig::default()
        };
        let p = cfg.retry_policy();
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.backoff_multiplier, 1);
    }

    #[test]
    fn defaults_match_protocol_timings() {
        let cfg = DeliveryConfig::default();
        assert_eq!(cfg.ack_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_attempts, 3);
        assert!(!cfg.cache_address_misses);
    }
}
