//! Circuit breaker around whole sync cycles

use std::time::{Duration, Instant};

use crate::config::SyncConfig;

/// Opens after `threshold` consecutive failed cycles and stays open for `cool_down`.
#[derive(Debug, Clone)]
pub struct CycleBreaker {
    threshold: u32,
    cool_down: Duration,
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl CycleBreaker {
    pub const fn new(threshold: u32, cool_down: Duration) -> Self {
        Self {
            threshold,
            cool_down,
            consecutive_failures: 0,
            open_until: None,
        }
    }

    pub const fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.breaker_threshold, config.breaker_cool_down())
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            tracing::info!(
                failures = self.consecutive_failures,
                "Sync recovered, breaker closed"
            );
        }
        self.consecutive_failures = 0;
        self.open_until = None;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.threshold {
            self.open_until = Some(now + self.cool_down);
            tracing::warn!(
                failures = self.consecutive_failures,
                cool_down_ms = u64::try_from(self.cool_down.as_millis()).unwrap_or(u64::MAX),
                "Sync breaker open"
            );
        }
    }

    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Time left before the next cycle is allowed, if the breaker is open.
    ///
    /// Once the cool-down has elapsed one cycle is let through; its outcome
    /// decides whether the breaker closes or re-opens.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.open_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

impl Default for CycleBreaker {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
