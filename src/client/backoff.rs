//! Reconnect delay schedules.

use std::time::Duration;

/// Decides whether and when to attempt a reconnect after the connection drops.
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    /// Delay before reconnect attempt number `attempt` (zero-based),
    /// or `None` to give up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Fixed delay, bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    /// Delay before every attempt
    pub delay: Duration,
    /// Attempts before giving up
    pub max_attempts: u32,
}

impl FixedBackoff {
    /// Create a fixed schedule
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }
}

impl Default for FixedBackoff {
    /// One attempt after five seconds.
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 1)
    }
}

impl BackoffPolicy for FixedBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.delay)
    }
}

/// Doubling delay with a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// First delay
    pub initial: Duration,
    /// Ceiling
    pub max: Duration,
    /// Attempts before giving up
    pub max_attempts: u32,
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.initial.saturating_mul(factor).min(self.max))
    }
}

/// Never reconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoReconnect;

impl BackoffPolicy for NoReconnect {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}
