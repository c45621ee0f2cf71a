//! Wire-format definitions for protocol messages.
//!
//! Every datagram exchanged between sender and receivers is a [`Message`].
//! This module is responsible for:
//! - Defining the on-wire ASCII layout of each message kind.
//! - Serialising a [`Message`] into a byte buffer ready for transmission.
//! - Parsing a raw byte slice back into a [`Message`], returning
//!   [`MessageError`] for anything that does not match the grammar.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! Messages are plain ASCII with no binary framing and no checksum; the
//! transport is trusted for integrity.
//!
//! ```text
//!  DATA       <seq>:<payload bytes, verbatim, may contain ':'>
//!  ACK        ACK <seq>
//!  NACK       NACK <seq>
//!  control    HELLO | HELLO ACK | CLOSE | CLOSE ACK
//! ```
//!
//! `<seq>` is a decimal integer in `0..=MAX_SEQ`.
//!
//! Decoding is attempted in a fixed order: the four control literals
//! (exact match), then the `ACK `/`NACK ` prefixes, then the data form.

use thiserror::Error;

/// Per-record sequence number.  The first record of a session carries 0.
pub type SeqNum = u32;

/// Largest sequence number a session may use (2^31 - 1).
pub const MAX_SEQ: SeqNum = (1 << 31) - 1;

const HELLO: &[u8] = b"HELLO";
const HELLO_ACK: &[u8] = b"HELLO ACK";
const CLOSE: &[u8] = b"CLOSE";
const CLOSE_ACK: &[u8] = b"CLOSE ACK";
const ACK_PREFIX: &[u8] = b"ACK ";
const NACK_PREFIX: &[u8] = b"NACK ";

/// A single protocol datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// One record, tagged with its sequence number.
    Data { seq: SeqNum, payload: Vec<u8> },
    /// Receiver accepted (or had already accepted) record `seq`.
    Ack { seq: SeqNum },
    /// Receiver is missing record `seq` (the oldest hole).
    Nack { seq: SeqNum },
    /// Sender opens a session.
    Hello,
    /// Receiver confirms the session.
    HelloAck,
    /// Sender ends the session.
    Close,
    /// Receiver confirms the end of the session.
    CloseAck,
}

impl Message {
    /// Serialise this message into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Data { seq, payload } => {
                let mut buf = format!("{seq}:").into_bytes();
                buf.extend_from_slice(payload);
                buf
            }
            Message::Ack { seq } => format!("ACK {seq}").into_bytes(),
            Message::Nack { seq } => format!("NACK {seq}").into_bytes(),
            Message::Hello => HELLO.to_vec(),
            Message::HelloAck => HELLO_ACK.to_vec(),
            Message::Close => CLOSE.to_vec(),
            Message::CloseAck => CLOSE_ACK.to_vec(),
        }
    }

    /// Parse a [`Message`] from a raw datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.is_empty() {
            return Err(MessageError::Empty);
        }

        match buf {
            HELLO => return Ok(Message::Hello),
            HELLO_ACK => return Ok(Message::HelloAck),
            CLOSE => return Ok(Message::Close),
            CLOSE_ACK => return Ok(Message::CloseAck),
            _ => {}
        }

        if let Some(rest) = buf.strip_prefix(ACK_PREFIX) {
            return parse_seq(rest).map(|seq| Message::Ack { seq });
        }
        if let Some(rest) = buf.strip_prefix(NACK_PREFIX) {
            return parse_seq(rest).map(|seq| Message::Nack { seq });
        }

        let colon = buf
            .iter()
            .position(|&b| b == b':')
            .ok_or(MessageError::Unrecognised)?;
        let seq = parse_seq(&buf[..colon])?;
        Ok(Message::Data {
            seq,
            payload: buf[colon + 1..].to_vec(),
        })
    }

    /// Sequence number carried by this message, if it has one.
    pub fn seq(&self) -> Option<SeqNum> {
        match self {
            Message::Data { seq, .. } | Message::Ack { seq } | Message::Nack { seq } => Some(*seq),
            _ => None,
        }
    }

    /// Short upper-case name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Data { .. } => "DATA",
            Message::Ack { .. } => "ACK",
            Message::Nack { .. } => "NACK",
            Message::Hello => "HELLO",
            Message::HelloAck => "HELLO ACK",
            Message::Close => "CLOSE",
            Message::CloseAck => "CLOSE ACK",
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.seq() {
            Some(seq) => write!(f, "{} {seq}", self.kind()),
            None => f.write_str(self.kind()),
        }
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Zero-length datagram.
    #[error("empty datagram")]
    Empty,
    /// Matches none of the control, feedback or data forms.
    #[error("datagram matches no known message form")]
    Unrecognised,
    /// The sequence field is not a non-empty run of ASCII digits.
    #[error("invalid sequence number field {0:?}")]
    InvalidSeq(String),
    /// The sequence field parsed, but lies beyond [`MAX_SEQ`].
    #[error("sequence number {0} exceeds the maximum of {MAX_SEQ}")]
    SeqOutOfRange(u64),
}

/// Parse a decimal sequence number; only ASCII digits are accepted.
fn parse_seq(field: &[u8]) -> Result<SeqNum, MessageError> {
    let invalid = || MessageError::InvalidSeq(String::from_utf8_lossy(field).into_owned());

    // u64::from_str would also accept a leading '+'.
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    let text = std::str::from_utf8(field).map_err(|_| invalid())?;
    let value: u64 = text.parse().map_err(|_| invalid())?;
    if value > u64::from(MAX_SEQ) {
        return Err(MessageError::SeqOutOfRange(value));
    }
    Ok(value as SeqNum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_wire_layout() {
        let msg = Message::Data {
            seq: 42,
            payload: b"hello".to_vec(),
        };
        assert_eq!(msg.encode(), b"42:hello");
    }

    #[test]
    fn feedback_wire_layout() {
        assert_eq!(Message::Ack { seq: 7 }.encode(), b"ACK 7");
        assert_eq!(Message::Nack { seq: 0 }.encode(), b"NACK 0");
    }

    #[test]
    fn control_literals_decode_exactly() {
        assert_eq!(Message::decode(b"HELLO"), Ok(Message::Hello));
        assert_eq!(Message::decode(b"HELLO ACK"), Ok(Message::HelloAck));
        assert_eq!(Message::decode(b"CLOSE"), Ok(Message::Close));
        assert_eq!(Message::decode(b"CLOSE ACK"), Ok(Message::CloseAck));
    }

    #[test]
    fn control_literal_with_trailing_bytes_is_malformed() {
        assert_eq!(Message::decode(b"HELLO!"), Err(MessageError::Unrecognised));
        assert_eq!(Message::decode(b"CLOSE ACK "), Err(MessageError::Unrecognised));
    }

    #[test]
    fn payload_may_contain_colons() {
        let decoded = Message::decode(b"3:a:b::c").unwrap();
        assert_eq!(
            decoded,
            Message::Data {
                seq: 3,
                payload: b"a:b::c".to_vec()
            }
        );
    }

    #[test]
    fn empty_payload_is_a_valid_record() {
        assert_eq!(
            Message::decode(b"9:"),
            Ok(Message::Data {
                seq: 9,
                payload: Vec::new()
            })
        );
    }

    #[test]
    fn payload_that_looks_like_control_stays_data() {
        let msg = Message::Data {
            seq: 1,
            payload: b"HELLO".to_vec(),
        };
        assert_eq!(Message::decode(&msg.encode()), Ok(msg));
    }

    #[test]
    fn ack_and_nack_parse() {
        assert_eq!(Message::decode(b"ACK 12"), Ok(Message::Ack { seq: 12 }));
        assert_eq!(Message::decode(b"NACK 0"), Ok(Message::Nack { seq: 0 }));
    }

    #[test]
    fn ack_with_garbage_seq_is_malformed() {
        assert!(matches!(
            Message::decode(b"ACK x1"),
            Err(MessageError::InvalidSeq(_))
        ));
        assert!(matches!(
            Message::decode(b"NACK "),
            Err(MessageError::InvalidSeq(_))
        ));
        assert!(matches!(
            Message::decode(b"ACK -1"),
            Err(MessageError::InvalidSeq(_))
        ));
    }

    #[test]
    fn signed_or_spaced_data_seq_is_malformed() {
        assert!(matches!(
            Message::decode(b"+4:x"),
            Err(MessageError::InvalidSeq(_))
        ));
        assert!(matches!(
            Message::decode(b" 4:x"),
            Err(MessageError::InvalidSeq(_))
        ));
        assert!(matches!(
            Message::decode(b":x"),
            Err(MessageError::InvalidSeq(_))
        ));
    }

    #[test]
    fn no_colon_is_unrecognised() {
        assert_eq!(Message::decode(b"1234"), Err(MessageError::Unrecognised));
        assert_eq!(Message::decode(b"garbage"), Err(MessageError::Unrecognised));
    }

    #[test]
    fn empty_datagram_is_rejected() {
        assert_eq!(Message::decode(b""), Err(MessageError::Empty));
    }

    #[test]
    fn seq_beyond_max_is_rejected() {
        let over = u64::from(MAX_SEQ) + 1;
        let wire = format!("{over}:x");
        assert_eq!(
            Message::decode(wire.as_bytes()),
            Err(MessageError::SeqOutOfRange(over))
        );
        assert!(matches!(
            Message::decode(b"ACK 99999999999999999999999"),
            Err(MessageError::InvalidSeq(_))
        ));
    }

    #[test]
    fn max_seq_is_accepted() {
        let wire = format!("ACK {MAX_SEQ}");
        assert_eq!(
            Message::decode(wire.as_bytes()),
            Ok(Message::Ack { seq: MAX_SEQ })
        );
    }

    #[test]
    fn leading_zeros_are_tolerated() {
        assert_eq!(Message::decode(b"ACK 007"), Ok(Message::Ack { seq: 7 }));
    }

    #[test]
    fn binary_payload_survives() {
        let payload = vec![0u8, 255, b':', b'\n', 17];
        let msg = Message::Data {
            seq: 5,
            payload: payload.clone(),
        };
        assert_eq!(
            Message::decode(&msg.encode()),
            Ok(Message::Data { seq: 5, payload })
        );
    }

    #[test]
    fn seq_accessor() {
        assert_eq!(Message::Nack { seq: 4 }.seq(), Some(4));
        assert_eq!(Message::Hello.seq(), None);
    }

    #[test]
    fn display_names_kind_and_seq() {
        let data = Message::Data {
            seq: 3,
            payload: b"x".to_vec(),
        };
        assert_eq!(data.to_string(), "DATA 3");
        assert_eq!(Message::CloseAck.to_string(), "CLOSE ACK");
    }
}
