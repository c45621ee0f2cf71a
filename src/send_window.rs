//! Selective-Repeat send-side window.
//!
//! [`SendWindow`] keeps up to `window_size` records in flight.  Each record
//! occupies one [`WindowSlot`] of a fixed ring indexed by
//! `seq mod window_size`, and is acknowledged individually.
//!
//! # Protocol contract
//!
//! - At most `window_size` records are in flight: `base ≤ next_seq ≤ base + W`.
//! - ACKs are **per record**.  An ACK for a slot other than `base` marks it
//!   but does not move the window; `base` slides over the contiguous run
//!   of acknowledged slots starting at `base`.
//! - A NACK re-sends exactly the named record, at once.
//! - A tick re-sends every unacknowledged record whose last transmission
//!   is at least `retransmit_timeout` old.  This is the backstop for lost
//!   data and lost ACKs alike; NACK is only the fast path.
//!
//! This module only manages state; every method that wants something on
//! the wire returns the [`Message`] and the caller transmits it.
//!
//! # Sequence-number layout
//!
//! ```text
//!       base            next_seq        base + W
//!        │                  │               │
//!  ──────┼──────────────────┼───────────────┼──────▶ seq space
//!        │ <── in flight ──▶│ <─ sendable ─▶│
//! ```

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::ArqConfig;
use crate::message::{Message, SeqNum, MAX_SEQ};

// ---------------------------------------------------------------------------
// WindowSlot
// ---------------------------------------------------------------------------

/// A single in-flight record.
#[derive(Debug, Clone)]
pub struct WindowSlot {
    pub seq: SeqNum,
    pub payload: Vec<u8>,
    pub acknowledged: bool,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    /// Total number of times this record has been transmitted.
    pub transmissions: u32,
}

impl WindowSlot {
    fn message(&self) -> Message {
        Message::Data {
            seq: self.seq,
            payload: self.payload.clone(),
        }
    }

    fn mark_sent(&mut self, now: Instant) {
        self.sent_at = now;
        self.transmissions += 1;
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Result of offering a record to the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submit {
    /// The record got a sequence number; transmit this `DATA` now.
    Accepted(Message),
    /// The window is full.  The record is handed back; offer it again once
    /// an ACK has advanced the window.
    Blocked(Vec<u8>),
}

/// What an ACK did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Outside `[base, next_seq)`, or already acknowledged.
    Ignored,
    /// Slot marked, `base` unchanged (an earlier record is still missing).
    Marked,
    /// Slot marked and `base` slid forward by this many records.
    Advanced(usize),
}

/// Caller errors raised by [`SendWindow::submit`] before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("record of {len} bytes exceeds the {max}-byte limit")]
    RecordTooLarge { len: usize, max: usize },
    #[error("sequence space exhausted after {MAX_SEQ}")]
    SequenceExhausted,
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Selective-Repeat send-side state for one session.
#[derive(Debug)]
pub struct SendWindow {
    /// Oldest unacknowledged sequence number (left window edge).
    base: SeqNum,
    /// Sequence number the next accepted record receives.
    next_seq: SeqNum,
    window_size: usize,
    max_record_size: usize,
    retransmit_timeout: Duration,
    /// Ring of `window_size` slots, indexed by `seq mod window_size`.
    slots: Vec<Option<WindowSlot>>,
}

impl SendWindow {
    /// Create an empty window whose first record will carry sequence 0.
    ///
    /// A `window_size` of 0 is raised to 1; [`ArqConfig::validate`] rejects
    /// it for configured windows.
    pub fn new(window_size: usize, max_record_size: usize, retransmit_timeout: Duration) -> Self {
        let window_size = window_size.max(1);
        Self {
            base: 0,
            next_seq: 0,
            window_size,
            max_record_size,
            retransmit_timeout,
            slots: vec![None; window_size],
        }
    }

    pub fn from_config(config: &ArqConfig) -> Self {
        Self::new(
            config.window_size,
            config.max_record_size,
            config.timers.retransmit_timeout,
        )
    }

    pub fn base(&self) -> SeqNum {
        self.base
    }

    pub fn next_seq(&self) -> SeqNum {
        self.next_seq
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of records sent but not yet slid past.
    pub fn in_flight(&self) -> usize {
        (self.next_seq - self.base) as usize
    }

    /// `true` when a new record would be accepted.
    pub fn can_submit(&self) -> bool {
        self.in_flight() < self.window_size
    }

    /// `true` when every submitted record has been acknowledged.
    pub fn is_drained(&self) -> bool {
        self.base == self.next_seq
    }

    /// The slot holding `seq`, if `seq` is currently in flight.
    pub fn slot(&self, seq: SeqNum) -> Option<&WindowSlot> {
        if !self.in_flight_range(seq) {
            return None;
        }
        self.slots[self.index(seq)]
            .as_ref()
            .filter(|slot| slot.seq == seq)
    }

    /// Offer a record to the window.
    ///
    /// On [`Submit::Accepted`] the record has been stored under `next_seq`
    /// and the returned `DATA` must be transmitted immediately.
    pub fn submit(&mut self, record: Vec<u8>, now: Instant) -> Result<Submit, SubmitError> {
        if record.len() > self.max_record_size {
            return Err(SubmitError::RecordTooLarge {
                len: record.len(),
                max: self.max_record_size,
            });
        }
        if !self.can_submit() {
            return Ok(Submit::Blocked(record));
        }
        if self.next_seq > MAX_SEQ {
            return Err(SubmitError::SequenceExhausted);
        }

        let seq = self.next_seq;
        let slot = WindowSlot {
            seq,
            payload: record,
            acknowledged: false,
            sent_at: now,
            transmissions: 1,
        };
        let msg = slot.message();
        let idx = self.index(seq);
        self.slots[idx] = Some(slot);
        self.next_seq += 1;
        log::debug!(
            "[arq:window] + seq={} in_flight={}/{}",
            seq,
            self.in_flight(),
            self.window_size
        );
        Ok(Submit::Accepted(msg))
    }

    /// Process an ACK for `seq`.
    ///
    /// `base` only ever moves forward: late and duplicate ACKs fall outside
    /// `[base, next_seq)` and are ignored.
    pub fn on_ack(&mut self, seq: SeqNum) -> AckOutcome {
        if !self.in_flight_range(seq) {
            return AckOutcome::Ignored;
        }
        let idx = self.index(seq);
        match self.slots[idx].as_mut() {
            Some(slot) if slot.seq == seq && !slot.acknowledged => slot.acknowledged = true,
            _ => return AckOutcome::Ignored,
        }

        let slid = self.slide();
        if slid == 0 {
            AckOutcome::Marked
        } else {
            AckOutcome::Advanced(slid)
        }
    }

    /// Process a NACK for `seq`.
    ///
    /// Returns the stored `DATA` to re-send when `seq` is in flight and
    /// unacknowledged; `None` otherwise.  Sequence state is untouched.
    pub fn on_nack(&mut self, seq: SeqNum, now: Instant) -> Option<Message> {
        if !self.in_flight_range(seq) {
            return None;
        }
        let idx = self.index(seq);
        let slot = self.slots[idx].as_mut()?;
        if slot.seq != seq || slot.acknowledged {
            return None;
        }
        slot.mark_sent(now);
        Some(slot.message())
    }

    /// Collect every unacknowledged record whose last transmission is at
    /// least `retransmit_timeout` old, refreshing its send time.
    ///
    /// Calling this again before the timeout elapses returns nothing.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Message> {
        let mut due = Vec::new();
        for seq in self.base..self.next_seq {
            let idx = self.index(seq);
            if let Some(slot) = self.slots[idx].as_mut() {
                if !slot.acknowledged
                    && now.saturating_duration_since(slot.sent_at) >= self.retransmit_timeout
                {
                    slot.mark_sent(now);
                    due.push(slot.message());
                }
            }
        }
        if !due.is_empty() {
            log::debug!("[arq:window] timeout: {} record(s) due", due.len());
        }
        due
    }

    /// First unacknowledged record transmitted more than `1 + max_retransmits`
    /// times, if any.
    pub fn overdue_slot(&self, max_retransmits: u32) -> Option<SeqNum> {
        let ceiling = max_retransmits.saturating_add(1);
        (self.base..self.next_seq).find(|&seq| {
            self.slots[self.index(seq)]
                .as_ref()
                .is_some_and(|slot| !slot.acknowledged && slot.transmissions > ceiling)
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn index(&self, seq: SeqNum) -> usize {
        seq as usize % self.window_size
    }

    fn in_flight_range(&self, seq: SeqNum) -> bool {
        self.base <= seq && seq < self.next_seq
    }

    /// Advance `base` over the acknowledged prefix, freeing each slot.
    fn slide(&mut self) -> usize {
        let mut slid = 0;
        while self.base < self.next_seq {
            let idx = self.index(self.base);
            match &self.slots[idx] {
                Some(slot) if slot.acknowledged => {
                    self.slots[idx] = None;
                    self.base += 1;
                    slid += 1;
                }
                _ => break,
            }
        }
        slid
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
