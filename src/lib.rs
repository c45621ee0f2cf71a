//! `mcast-arq`: reliable, ordered record delivery over UDP multicast using
//! Selective-Repeat ARQ.
//!
//! # Architecture
//!
//! ```text
//!  RecordSource                                         RecordSink
//!       │                                                    ▲
//!  ┌────▼─────────────┐   HELLO / DATA / CLOSE   ┌───────────┴──────┐
//!  │ SenderConnection │─────────(group)─────────▶│ReceiverConnection│
//!  │  Session         │                          │  Session         │
//!  │  SendWindow      │◀────────(unicast)────────│  Sequencer       │
//!  └────┬─────────────┘  HELLO ACK / ACK / NACK  └───────────┬──────┘
//!       │                      / CLOSE ACK                   │
//!  ┌────▼──────┐                                       ┌─────▼─────┐
//!  │ EventLoop │  select!(stop, tick, recv)            │ EventLoop │
//!  └────┬──────┘                                       └─────┬─────┘
//!       │ Transport: UdpTransport / MemoryTransport / Simulator
//! ```
//!
//! Each module has a single responsibility:
//! - [`message`]: wire format (encode / decode)
//! - [`state`]: session phases and roles
//! - [`session`]: handshake and teardown state machine
//! - [`send_window`]: Selective-Repeat sender window
//! - [`sequencer`]: in-order receive-side delivery
//! - [`timer`]: timer intervals and retry budgets
//! - [`config`]: protocol configuration and validation
//! - [`event_loop`]: single-task dispatcher over stop, tick and transport
//! - [`connection`]: sender and receiver connections
//! - [`record`]: record sources and sinks
//! - [`transport`]: datagram transport trait and in-process network
//! - [`socket`]: UDP and multicast transport
//! - [`simulator`]: lossy / duplicating / reordering network for testing

pub mod config;
pub mod connection;
pub mod event_loop;
pub mod message;
pub mod record;
pub mod send_window;
pub mod sequencer;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod transport;

pub use config::ArqConfig;
pub use connection::{ConnError, ReceiverConnection, SenderConnection, SessionReport, TransferReport};
pub use message::{Message, SeqNum};
pub use timer::TimerConfig;
