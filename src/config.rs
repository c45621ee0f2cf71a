//! Protocol configuration.
//!
//! [`ArqConfig`] gathers every tunable the sender and receiver recognise.
//! Values are validated once, when a connection is built, so the state
//! machines can rely on them (`window_size >= 1`, non-zero intervals).

use std::time::Duration;

use thiserror::Error;

use crate::timer::TimerConfig;

/// Largest accepted window size.
pub const MAX_WINDOW_SIZE: usize = 1024;

/// Largest accepted `max_record_size`; keeps an encoded DATA message inside
/// a single UDP datagram.
pub const MAX_RECORD_LIMIT: usize = 60_000;

/// Every option recognised by the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArqConfig {
    /// Number of records that may be in flight at once.
    pub window_size: usize,
    /// Largest record payload accepted by `submit`, in bytes.
    pub max_record_size: usize,
    /// `HELLO` retries before the handshake is abandoned.
    pub handshake_retry_limit: u32,
    /// `CLOSE` retries before the close is declared best-effort.
    pub close_retry_limit: u32,
    /// Retransmissions of one record before the peer is declared
    /// unresponsive.  `None` retries forever.
    pub max_retransmits: Option<u32>,
    pub timers: TimerConfig,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            window_size: 8,
            max_record_size: 1024,
            handshake_retry_limit: 10,
            close_retry_limit: 3,
            max_retransmits: None,
            timers: TimerConfig::default(),
        }
    }
}

impl ArqConfig {
    /// Check every value against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::WindowSize(self.window_size));
        }
        if self.max_record_size == 0 || self.max_record_size > MAX_RECORD_LIMIT {
            return Err(ConfigError::RecordSize(self.max_record_size));
        }

        let t = &self.timers;
        let intervals = [
            ("tick_interval", t.tick_interval),
            ("retransmit_timeout", t.retransmit_timeout),
            ("handshake_retry_interval", t.handshake_retry_interval),
            ("close_retry_interval", t.close_retry_interval),
        ];
        for (name, value) in intervals {
            if value == Duration::ZERO {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        Ok(())
    }
}

/// An [`ArqConfig`] value outside its allowed range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("window size {0} outside 1..={MAX_WINDOW_SIZE}")]
    WindowSize(usize),
    #[error("max record size {0} outside 1..={MAX_RECORD_LIMIT}")]
    RecordSize(usize),
    #[error("{0} must be non-zero")]
    ZeroInterval(&'static str),
}
