//! Exponential retry backoff

use std::time::Duration;

use crate::config::QueueConfig;

/// `min(initial * 2^retry_count, max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    pub const fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Delay before the next attempt of a mutation that has failed `retry_count` times.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 2_u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(5), Duration::from_secs(32));
        assert_eq!(backoff.delay(6), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_saturates_for_large_counts() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(10));
        assert_eq!(backoff.delay(40), Duration::from_secs(10));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(10));
    }
}
