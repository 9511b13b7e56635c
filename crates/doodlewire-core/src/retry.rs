//! Reconnect delays for clients that lose their relay connection.

use std::time::Duration;

/// How long a client waits before its next connection attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryPolicy {
    /// Give up after the first failure.
    Never,
    /// Wait the same delay before every attempt.
    Fixed(Duration),
    /// Multiply the delay by `factor` after every failed attempt, up to `max`.
    /// A `factor` below 1.0 or not finite is treated as 1.0.
    Exponential {
        initial: Duration,
        max: Duration,
        factor: f64,
    },
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (starting at 0), or `None` to stop.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            Self::Never => None,
            Self::Fixed(delay) => Some(delay),
            Self::Exponential { initial, max, factor } => {
                let factor = if factor.is_finite() && factor >= 1.0 { factor } else { 1.0 };
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let secs = initial.as_secs_f64() * factor.powi(exponent);
                Some(Duration::from_secs_f64(secs.max(0.0).min(max.as_secs_f64())))
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Fixed(Duration::from_secs(3))
    }
}
