//! Fixed-delay reconnection with a bounded run of consecutive failures

use std::time::Duration;

use rand::Rng;

use crate::config::ChannelConfig;

/// Reconnect policy
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before each attempt
    pub delay: Duration,
    /// Consecutive attempts allowed without a successful open
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0); 0.0 keeps the delay fixed
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(3000),
            max_attempts: 5,
            jitter_factor: 0.0,
        }
    }
}

impl From<&ChannelConfig> for ReconnectPolicy {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            delay: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
            jitter_factor: config.reconnect_jitter,
        }
    }
}

/// Counts consecutive reconnect attempts since the last successful open
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl RetryBudget {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Claim the next attempt and return the delay to wait before it, or
    /// `None` once `max_attempts` consecutive attempts have been used.
    pub fn next_attempt(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(self.delay())
    }

    fn delay(&self) -> Duration {
        let base = self.policy.delay.as_millis() as f64;
        if self.policy.jitter_factor <= 0.0 || base <= 0.0 {
            return self.policy.delay;
        }

        let jitter_range = base * self.policy.jitter_factor;
        let jitter = rand::rng().random_range(-jitter_range..jitter_range);
        Duration::from_millis((base + jitter).max(1.0) as u64)
    }

    /// Reset after a successful open
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts claimed since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.policy.max_attempts
    }
}
