//! Retransmit, handshake and close timer settings.
//!
//! Every timer in the protocol is a simple fixed interval; there is no RTT
//! estimation and no exponential back-off.  This module provides:
//! - [`TimerConfig`]: the independent interval values.
//! - [`RetryBudget`]: a bounded retry counter shared by the handshake and
//!   the close exchange.
//!
//! The timers themselves are driven by the tick source in
//! [`crate::event_loop`]; nothing here sleeps.

use std::time::Duration;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Period of the event-loop tick during data transfer.
    pub tick_interval: Duration,
    /// Minimum age of a transmission before a tick re-sends it.
    pub retransmit_timeout: Duration,
    /// Interval between `HELLO` retries.
    pub handshake_retry_interval: Duration,
    /// Interval between `CLOSE` retries.
    pub close_retry_interval: Duration,
    /// How long a receiver keeps answering duplicate `CLOSE`s after closing.
    pub close_linger: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(300),
            retransmit_timeout: Duration::from_millis(900),
            handshake_retry_interval: Duration::from_millis(300),
            close_retry_interval: Duration::from_millis(300),
            close_linger: Duration::from_millis(900),
        }
    }
}

impl TimerConfig {
    /// Every interval set to `interval`, and the retransmit timeout and
    /// linger to three of them.  Handy for tests and quick local runs.
    pub fn uniform(interval: Duration) -> Self {
        Self {
            tick_interval: interval,
            retransmit_timeout: interval * 3,
            handshake_retry_interval: interval,
            close_retry_interval: interval,
            close_linger: interval * 3,
        }
    }
}

/// Counts retries against a fixed ceiling.
///
/// The initial transmission is not a retry: a budget with `limit = 2`
/// allows three transmissions in total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    limit: u32,
    used: u32,
}

impl RetryBudget {
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    /// Spend one retry.  Returns `false` once the ceiling has been reached;
    /// the counter does not move in that case.
    pub fn try_retry(&mut self) -> bool {
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }

    /// Transmissions so far, counting the initial one.
    pub fn attempts(&self) -> u32 {
        self.used + 1
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }
}
