//! Single-task event loop.
//!
//! Every connection is driven by one [`EventLoop`]: a `tokio::select!` over
//! a stop signal, a periodic tick and the transport.  Each call to
//! [`EventLoop::next_event`] yields exactly one [`Event`], and the caller
//! handles it to completion before asking for the next, so the protocol
//! state is never touched concurrently and needs no locking.
//!
//! ```text
//!   StopHandle ──watch──┐
//!   Interval ───tick────┼──▶ select! (biased) ──▶ Event ──▶ connection
//!   Transport ──recv────┘
//! ```
//!
//! The tick uses `tokio::time`, so tests running on a paused clock advance
//! retransmission and handshake timers without real waiting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::message::Message;
use crate::transport::{Transport, TransportError};

/// One unit of work for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A well-formed message arrived from `from`.
    Message { msg: Message, from: SocketAddr },
    /// The tick interval elapsed.
    Tick,
    /// Shutdown was requested through a [`StopHandle`].
    Stop,
}

/// Requests shutdown of the loops built from [`stop_channel`].  Cheap to
/// clone; the signal is level-triggered, so a loop that starts after
/// [`StopHandle::stop`] stops immediately.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }
}

/// A fresh stop signal and the receiver an [`EventLoop`] listens on.
pub fn stop_channel() -> (StopHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (StopHandle(Arc::new(tx)), rx)
}

/// Multiplexes stop, tick and inbound datagrams for one connection.
#[derive(Debug)]
pub struct EventLoop<T> {
    transport: Arc<T>,
    ticker: Interval,
    stop: watch::Receiver<bool>,
    /// Every [`StopHandle`] was dropped; only tick and receive remain.
    stop_closed: bool,
    malformed: u64,
}

impl<T: Transport> EventLoop<T> {
    /// The first tick fires one `period` from now.
    pub fn new(transport: Arc<T>, period: Duration, stop: watch::Receiver<bool>) -> Self {
        Self {
            transport,
            ticker: ticker(period),
            stop,
            stop_closed: false,
            malformed: 0,
        }
    }

    /// Restart the tick at a new period, first tick one `period` from now.
    pub fn set_period(&mut self, period: Duration) {
        self.ticker = ticker(period);
    }

    /// Datagrams discarded because they failed to decode.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Wait for the next event.
    ///
    /// Order of precedence when several are ready: stop, then tick, then
    /// inbound messages.  Datagrams that fail to decode are logged, counted
    /// and skipped.  A transport error is returned as is.
    pub async fn next_event(&mut self) -> Result<Event, TransportError> {
        loop {
            if *self.stop.borrow() {
                return Ok(Event::Stop);
            }

            tokio::select! {
                biased;

                // ── Branch 1: stop requested ─────────────────────────────
                changed = self.stop.changed(), if !self.stop_closed => {
                    if changed.is_err() {
                        log::debug!("[arq:loop] stop channel closed; running until the caller returns");
                        self.stop_closed = true;
                    }
                }

                // ── Branch 2: tick ───────────────────────────────────────
                _ = self.ticker.tick() => return Ok(Event::Tick),

                // ── Branch 3: inbound datagram ───────────────────────────
                received = self.transport.recv_from() => {
                    let (bytes, from) = received?;
                    match Message::decode(&bytes) {
                        Ok(msg) => {
                            log::trace!("[arq:loop] ← {msg} from {from}");
                            return Ok(Event::Message { msg, from });
                        }
                        Err(e) => {
                            self.malformed += 1;
                            log::warn!("[arq:loop] discarding datagram from {from}: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Transmit `msg` to `dest`.
    ///
    /// A send failure is logged and treated like a lost datagram; the
    /// retransmission machinery recovers from it.  Returns `false` when the
    /// send failed.
    pub async fn send(&self, msg: &Message, dest: SocketAddr) -> bool {
        match self.transport.send_to(&msg.encode(), dest).await {
            Ok(()) => {
                log::trace!("[arq:loop] → {msg} to {dest}");
                true
            }
            Err(e) => {
                log::warn!("[arq:loop] send of {} to {dest} failed: {e}", msg.kind());
                false
            }
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
