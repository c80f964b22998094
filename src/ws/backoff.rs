use std::time::Duration;

use super::config::ReconnectConfig;

/// Reconnect delay policy: `initial * multiplier^attempt`, no jitter, with a
/// hard ceiling on attempts.
///
/// With the default [`ReconnectConfig`] the delays are 1, 2, 4, ... 64 seconds
/// and the seventh failed reconnect is final.
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    initial: Duration,
    multiplier: u32,
    ceiling: u32,
}

impl BackoffScheduler {
    #[must_use]
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            initial: config.initial_backoff,
            multiplier: config.backoff_multiplier,
            ceiling: config.max_attempts,
        }
    }

    /// Delay to wait before reconnect attempt number `attempt + 1`.
    ///
    /// Saturates instead of overflowing for absurd attempt counts.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor)
    }

    /// Whether another reconnect may be scheduled after `attempt` attempts.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.ceiling
    }

    #[must_use]
    pub const fn ceiling(&self) -> u32 {
        self.ceiling
    }
}

impl Default for BackoffScheduler {
    fn default() -> Self {
        Self::new(&ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_one_second() {
        let scheduler = BackoffScheduler::default();

        for attempt in 0..=6 {
            assert_eq!(
                scheduler.next_delay(attempt),
                Duration::from_secs(2_u64.pow(attempt)),
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn retries_stop_at_ceiling() {
        let scheduler = BackoffScheduler::default();

        assert!((0..7).all(|attempt| scheduler.should_retry(attempt)));
        assert!(!scheduler.should_retry(7));
        assert!(!scheduler.should_retry(8));
    }

    #[test]
    fn huge_attempt_saturates() {
        let scheduler = BackoffScheduler::default();

        assert!(scheduler.next_delay(200) >= Duration::from_secs(u64::from(u32::MAX)));
    }

    #[test]
    fn custom_policy() {
        let config = ReconnectConfig::builder()
            .initial_backoff(Duration::from_millis(100))
            .backoff_multiplier(3)
            .max_attempts(2)
            .build();
        let scheduler = BackoffScheduler::new(&config);

        assert_eq!(scheduler.next_delay(2), Duration::from_millis(900));
        assert!(scheduler.should_retry(1));
        assert!(!scheduler.should_retry(2));
    }
}
