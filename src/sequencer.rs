//! Receive-side sequencer.
//!
//! [`Sequencer`] tracks the next expected sequence number and classifies
//! every inbound `DATA`:
//!
//! - **In order** (`seq == expected`): deliver, advance, `ACK seq`.
//! - **Gap** (`seq > expected`): do not deliver, do not advance, and
//!   `NACK expected`, naming the oldest hole rather than the record that
//!   just arrived.  The early record is dropped, not buffered; the sender's
//!   NACK/timeout retransmission brings it back later.
//! - **Duplicate** (`seq < expected`): already delivered, so re-`ACK seq`
//!   only.  Repeated ACKs are harmless and cover ACKs lost on the way back.
//!
//! Delivery is therefore exactly-once and strictly increasing.  This module
//! only manages state; the connection sends [`Reception::feedback`] and
//! hands delivered records to the sink.

use crate::message::{Message, SeqNum};

/// Classification of one inbound `DATA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reception {
    /// Next record in order; hand `record` to the sink.
    Deliver { seq: SeqNum, record: Vec<u8> },
    /// Arrived ahead of `expected`; dropped.
    Gap { seq: SeqNum, expected: SeqNum },
    /// Already delivered earlier.
    Duplicate { seq: SeqNum },
}

impl Reception {
    /// The feedback message owed to the sender.
    pub fn feedback(&self) -> Message {
        match self {
            Reception::Deliver { seq, .. } | Reception::Duplicate { seq } => Message::Ack { seq: *seq },
            Reception::Gap { expected, .. } => Message::Nack { seq: *expected },
        }
    }
}

/// Receive-side state for one session.
#[derive(Debug, Default)]
pub struct Sequencer {
    /// Next sequence number to deliver.  Only moves forward, except on
    /// [`Sequencer::reset`] at the start of a new session.
    expected: SeqNum,
    delivered: u64,
    duplicates: u64,
    gaps: u64,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expected(&self) -> SeqNum {
        self.expected
    }

    /// Forget everything; the next session starts at sequence 0.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Classify an inbound record and update the expected sequence number.
    pub fn on_data(&mut self, seq: SeqNum, payload: Vec<u8>) -> Reception {
        if seq == self.expected {
            self.expected += 1;
            self.delivered += 1;
            Reception::Deliver {
                seq,
                record: payload,
            }
        } else if seq > self.expected {
            self.gaps += 1;
            Reception::Gap {
                seq,
                expected: self.expected,
            }
        } else {
            self.duplicates += 1;
            Reception::Duplicate { seq }
        }
    }

    /// Records delivered in this session.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Records seen again after delivery.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Records that arrived ahead of a hole.
    pub fn gaps(&self) -> u64 {
        self.gaps
    }
}
