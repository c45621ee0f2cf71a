//! Handshake and teardown state machine.
//!
//! [`Session`] decides what a control message (`HELLO`, `HELLO ACK`,
//! `CLOSE`, `CLOSE ACK`) or a handshake/close timer tick does to the
//! session phase, and which reply, if any, must go back on the wire.  Like
//! [`crate::send_window`] it performs no I/O: the connection layer sends
//! whatever message a method hands back.
//!
//! Duplicate handshake messages are expected on an unreliable transport.
//! A receiver answers a repeated `HELLO` or `CLOSE` by re-sending the ack
//! and leaves its state alone ([`Transition::Repeated`]).

use thiserror::Error;

use crate::config::ArqConfig;
use crate::message::Message;
use crate::state::{Phase, Role};
use crate::timer::RetryBudget;

/// What a control message did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Unexpected in the current phase; nothing changed.
    Ignored,
    /// The session moved to `phase`; `reply` (if any) must be sent.
    Entered { phase: Phase, reply: Option<Message> },
    /// A duplicate of a message already handled; re-send `reply` only.
    Repeated { reply: Message },
}

/// Handshake failures and API misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no HELLO ACK after {attempts} HELLO attempt(s)")]
    HandshakeTimeout { attempts: u32 },
    #[error("{role} session cannot {action} while {phase}")]
    BadPhase {
        role: Role,
        phase: Phase,
        action: &'static str,
    },
}

/// Phase and retry bookkeeping for one session.
#[derive(Debug, Clone)]
pub struct Session {
    role: Role,
    phase: Phase,
    hello_retries: RetryBudget,
    close_retries: RetryBudget,
    handshakes: u32,
}

impl Session {
    /// A sender session in `Idle`, with retry ceilings taken from `config`.
    pub fn sender(config: &ArqConfig) -> Self {
        Self {
            role: Role::Sender,
            phase: Phase::Idle,
            hello_retries: RetryBudget::new(config.handshake_retry_limit),
            close_retries: RetryBudget::new(config.close_retry_limit),
            handshakes: 0,
        }
    }

    /// A receiver session in `Idle`.  Receivers never retry on their own.
    pub fn receiver() -> Self {
        Self {
            role: Role::Receiver,
            phase: Phase::Idle,
            hello_retries: RetryBudget::new(0),
            close_retries: RetryBudget::new(0),
            handshakes: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of times this session entered `Transferring`.  Never more
    /// than one.
    pub fn handshakes(&self) -> u32 {
        self.handshakes
    }

    /// `HELLO` transmissions so far, counting the first.
    pub fn hello_attempts(&self) -> u32 {
        if self.phase == Phase::Idle {
            0
        } else {
            self.hello_retries.attempts()
        }
    }

    // -----------------------------------------------------------------------
    // Sender-driven transitions
    // -----------------------------------------------------------------------

    /// Open the session: `Idle → Handshaking`.  Returns the first `HELLO`.
    pub fn start(&mut self) -> Result<Message, SessionError> {
        self.require(Role::Sender, Phase::Idle, "start")?;
        self.enter(Phase::Handshaking);
        Ok(Message::Hello)
    }

    /// The handshake retry interval elapsed without a `HELLO ACK`.
    ///
    /// Returns the `HELLO` to re-send, or [`SessionError::HandshakeTimeout`]
    /// once the retry ceiling is spent.
    pub fn handshake_tick(&mut self) -> Result<Message, SessionError> {
        self.require(Role::Sender, Phase::Handshaking, "retry the handshake")?;
        if self.hello_retries.try_retry() {
            log::debug!(
                "[arq:session] HELLO attempt {}",
                self.hello_retries.attempts()
            );
            Ok(Message::Hello)
        } else {
            Err(SessionError::HandshakeTimeout {
                attempts: self.hello_retries.attempts(),
            })
        }
    }

    /// Source exhausted and window drained: `Transferring → Closing`.
    /// Returns the first `CLOSE`.
    pub fn begin_close(&mut self) -> Result<Message, SessionError> {
        self.require(Role::Sender, Phase::Transferring, "close")?;
        self.enter(Phase::Closing);
        Ok(Message::Close)
    }

    /// The close retry interval elapsed without a `CLOSE ACK`.
    ///
    /// Returns the `CLOSE` to re-send, or `None` after the retry ceiling,
    /// in which case the session is now `Closed` (best effort).  Outside
    /// `Closing` this is a no-op returning `None`.
    pub fn close_tick(&mut self) -> Option<Message> {
        if self.role != Role::Sender || self.phase != Phase::Closing {
            return None;
        }
        if self.close_retries.try_retry() {
            Some(Message::Close)
        } else {
            self.enter(Phase::Closed);
            None
        }
    }

    // -----------------------------------------------------------------------
    // Inbound control messages
    // -----------------------------------------------------------------------

    /// Apply an inbound control message.  Data and feedback messages are
    /// not control messages and always yield [`Transition::Ignored`].
    pub fn on_control(&mut self, msg: &Message) -> Transition {
        match self.role {
            Role::Sender => self.sender_control(msg),
            Role::Receiver => self.receiver_control(msg),
        }
    }

    fn sender_control(&mut self, msg: &Message) -> Transition {
        match (self.phase, msg) {
            (Phase::Handshaking, Message::HelloAck) => {
                self.handshakes += 1;
                self.enter(Phase::Transferring);
                Transition::Entered {
                    phase: Phase::Transferring,
                    reply: None,
                }
            }
            (Phase::Closing, Message::CloseAck) => {
                self.enter(Phase::Closed);
                Transition::Entered {
                    phase: Phase::Closed,
                    reply: None,
                }
            }
            _ => Transition::Ignored,
        }
    }

    fn receiver_control(&mut self, msg: &Message) -> Transition {
        match (self.phase, msg) {
            (Phase::Idle, Message::Hello) => {
                self.handshakes += 1;
                self.enter(Phase::Transferring);
                Transition::Entered {
                    phase: Phase::Transferring,
                    reply: Some(Message::HelloAck),
                }
            }
            (Phase::Transferring, Message::Hello) => Transition::Repeated {
                reply: Message::HelloAck,
            },
            (Phase::Transferring, Message::Close) => {
                self.enter(Phase::Closed);
                Transition::Entered {
                    phase: Phase::Closed,
                    reply: Some(Message::CloseAck),
                }
            }
            (Phase::Idle | Phase::Closed, Message::Close) => Transition::Repeated {
                reply: Message::CloseAck,
            },
            _ => Transition::Ignored,
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn require(&self, role: Role, phase: Phase, action: &'static str) -> Result<(), SessionError> {
        if self.role == role && self.phase == phase {
            Ok(())
        } else {
            Err(SessionError::BadPhase {
                role: self.role,
                phase: self.phase,
                action,
            })
        }
    }

    fn enter(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_enter(next, self.role),
            "illegal {} transition {} → {}",
            self.role,
            self.phase,
            next
        );
        log::info!("[arq:session] {} {} → {}", self.role, self.phase, next);
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender_with(handshake: u32, close: u32) -> Session {
        let config = ArqConfig {
            handshake_retry_limit: handshake,
            close_retry_limit: close,
            ..ArqConfig::default()
        };
        Session::sender(&config)
    }

    #[test]
    fn sender_handshake_happy_path() {
        let mut s = sender_with(3, 3);
        assert_eq!(s.start(), Ok(Message::Hello));
        assert_eq!(s.phase(), Phase::Handshaking);
        assert_eq!(
            s.on_control(&Message::HelloAck),
            Transition::Entered {
                phase: Phase::Transferring,
                reply: None
            }
        );
        assert_eq!(s.phase(), Phase::Transferring);
        assert_eq!(s.handshakes(), 1);
    }

    #[test]
    fn duplicate_hello_ack_enters_transferring_once() {
        let mut s = sender_with(3, 3);
        s.start().unwrap();
        s.on_control(&Message::HelloAck);
        assert_eq!(s.on_control(&Message::HelloAck), Transition::Ignored);
        assert_eq!(s.handshakes(), 1);
    }

    #[test]
    fn handshake_times_out_after_limit() {
        let mut s = sender_with(2, 3);
        s.start().unwrap();
        assert_eq!(s.handshake_tick(), Ok(Message::Hello));
        assert_eq!(s.handshake_tick(), Ok(Message::Hello));
        assert_eq!(
            s.handshake_tick(),
            Err(SessionError::HandshakeTimeout { attempts: 3 })
        );
        assert_eq!(s.hello_attempts(), 3);
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut s = sender_with(1, 1);
        s.start().unwrap();
        assert!(matches!(s.start(), Err(SessionError::BadPhase { .. })));
    }

    #[test]
    fn close_ack_completes_close() {
        let mut s = sender_with(1, 1);
        s.start().unwrap();
        s.on_control(&Message::HelloAck);
        assert_eq!(s.begin_close(), Ok(Message::Close));
        assert_eq!(s.phase(), Phase::Closing);
        assert!(matches!(
            s.on_control(&Message::CloseAck),
            Transition::Entered {
                phase: Phase::Closed,
                ..
            }
        ));
    }

    #[test]
    fn close_gives_up_after_limit() {
        let mut s = sender_with(1, 2);
        s.start().unwrap();
        s.on_control(&Message::HelloAck);
        s.begin_close().unwrap();
        assert_eq!(s.close_tick(), Some(Message::Close));
        assert_eq!(s.close_tick(), Some(Message::Close));
        assert_eq!(s.close_tick(), None);
        assert_eq!(s.phase(), Phase::Closed);
    }

    #[test]
    fn close_ack_while_idle_is_ignored() {
        let mut s = sender_with(1, 1);
        assert_eq!(s.on_control(&Message::CloseAck), Transition::Ignored);
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn receiver_hello_and_repeat() {
        let mut r = Session::receiver();
        assert_eq!(
            r.on_control(&Message::Hello),
            Transition::Entered {
                phase: Phase::Transferring,
                reply: Some(Message::HelloAck)
            }
        );
        assert_eq!(
            r.on_control(&Message::Hello),
            Transition::Repeated {
                reply: Message::HelloAck
            }
        );
        assert_eq!(r.handshakes(), 1);
    }

    #[test]
    fn receiver_close_and_repeat() {
        let mut r = Session::receiver();
        r.on_control(&Message::Hello);
        assert_eq!(
            r.on_control(&Message::Close),
            Transition::Entered {
                phase: Phase::Closed,
                reply: Some(Message::CloseAck)
            }
        );
        assert_eq!(
            r.on_control(&Message::Close),
            Transition::Repeated {
                reply: Message::CloseAck
            }
        );
        assert_eq!(r.phase(), Phase::Closed);
    }

    #[test]
    fn receiver_ignores_acks_and_late_hello() {
        let mut r = Session::receiver();
        assert_eq!(r.on_control(&Message::HelloAck), Transition::Ignored);
        assert_eq!(r.on_control(&Message::CloseAck), Transition::Ignored);
        r.on_control(&Message::Hello);
        r.on_control(&Message::Close);
        assert_eq!(r.on_control(&Message::Hello), Transition::Ignored);
        assert_eq!(r.phase(), Phase::Closed);
    }

    #[test]
    fn receiver_cannot_start() {
        let mut r = Session::receiver();
        assert!(r.start().is_err());
        assert!(r.handshake_tick().is_err());
        assert_eq!(r.close_tick(), None);
    }

    #[test]
    fn data_is_not_control() {
        let mut r = Session::receiver();
        let data = Message::Data {
            seq: 0,
            payload: vec![],
        };
        assert_eq!(r.on_control(&data), Transition::Ignored);
    }
}
