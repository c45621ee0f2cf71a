//! Session finite-state machine (FSM) types.
//!
//! This module defines the phases a session can occupy and the role it
//! plays.  Transition *logic* lives in [`crate::session`]; keeping the
//! types here lets the connection, the logs and the tests name phases
//! without pulling in handshake plumbing.
//!
//! ```text
//!  Idle ──start/HELLO──▶ Handshaking ──HELLO ACK──▶ Transferring
//!    │                                                   │
//!    │ HELLO (receiver)                    drained/CLOSE │
//!    └──────────────────▶ Transferring                   ▼
//!                                       Closing ──CLOSE ACK / give up──▶ Closed
//! ```
//!
//! A receiver skips `Handshaking` and `Closing`: it moves straight from
//! `Idle` to `Transferring` on `HELLO` and from `Transferring` to `Closed`
//! on `CLOSE`.

/// Which end of the stream a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

/// All possible phases of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// No session yet; initial phase.
    #[default]
    Idle,
    /// `HELLO` sent, waiting for `HELLO ACK` (sender only).
    Handshaking,
    /// Records are flowing.
    Transferring,
    /// `CLOSE` sent, waiting for `CLOSE ACK` (sender only).
    Closing,
    /// Session over.
    Closed,
}

impl Phase {
    /// `true` when `self → next` is an edge of the diagram above for `role`.
    pub fn can_enter(self, next: Phase, role: Role) -> bool {
        use Phase::*;
        match role {
            Role::Sender => matches!(
                (self, next),
                (Idle, Handshaking)
                    | (Handshaking, Transferring)
                    | (Transferring, Closing)
                    | (Closing, Closed)
            ),
            Role::Receiver => matches!((self, next), (Idle, Transferring) | (Transferring, Closed)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle() {
        assert_eq!(Phase::default(), Phase::Idle);
    }

    #[test]
    fn sender_edges() {
        assert!(Phase::Idle.can_enter(Phase::Handshaking, Role::Sender));
        assert!(Phase::Handshaking.can_enter(Phase::Transferring, Role::Sender));
        assert!(Phase::Transferring.can_enter(Phase::Closing, Role::Sender));
        assert!(Phase::Closing.can_enter(Phase::Closed, Role::Sender));
        assert!(!Phase::Idle.can_enter(Phase::Transferring, Role::Sender));
        assert!(!Phase::Closed.can_enter(Phase::Handshaking, Role::Sender));
    }

    #[test]
    fn receiver_edges() {
        assert!(Phase::Idle.can_enter(Phase::Transferring, Role::Receiver));
        assert!(Phase::Transferring.can_enter(Phase::Closed, Role::Receiver));
        assert!(!Phase::Idle.can_enter(Phase::Handshaking, Role::Receiver));
        assert!(!Phase::Transferring.can_enter(Phase::Closing, Role::Receiver));
    }
}
