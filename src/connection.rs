//! Sender and receiver connections.
//!
//! A connection owns the complete state for one session and drives it from
//! a single [`EventLoop`]:
//!
//! ```text
//!  SenderConnection                        ReceiverConnection
//!    ├── Session     (HELLO / CLOSE)         ├── Session   (HELLO ACK / CLOSE ACK)
//!    ├── SendWindow  (selective repeat)      ├── Sequencer (in-order delivery)
//!    └── EventLoop ── Transport ── network ── EventLoop
//! ```
//!
//! The sender multicasts `HELLO`, `DATA` and `CLOSE` to the group address
//! and talks to exactly one receiver: the first to answer `HELLO ACK`.
//! Feedback from any other address is ignored.  A receiver binds to the
//! first sender whose `HELLO` it sees and answers it by unicast.
//!
//! # Usage
//!
//! ```ignore
//! let transport = Arc::new(UdpTransport::sender(bind, 1, true)?);
//! let mut conn = SenderConnection::new(transport, group, ArqConfig::default())?;
//! let report = conn.send_stream(&mut LineSource::open("records.txt")?).await?;
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::{ArqConfig, ConfigError};
use crate::event_loop::{stop_channel, Event, EventLoop, StopHandle};
use crate::message::{Message, SeqNum};
use crate::record::{RecordSink, RecordSource};
use crate::send_window::{AckOutcome, SendWindow, Submit, SubmitError};
use crate::sequencer::{Reception, Sequencer};
use crate::session::{Session, SessionError, Transition};
use crate::state::{Phase, Role};
use crate::transport::{Transport, TransportError};

// ---------------------------------------------------------------------------
// Errors and reports
// ---------------------------------------------------------------------------

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("handshake timed out after {attempts} HELLO attempt(s)")]
    HandshakeTimeout { attempts: u32 },
    #[error(transparent)]
    Session(SessionError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("record source failed: {0}")]
    Source(#[source] io::Error),
    #[error("record sink failed: {0}")]
    Sink(#[source] io::Error),
    #[error("stopped")]
    Stopped,
    #[error("peer unresponsive: record {seq} exhausted its retransmissions")]
    PeerUnresponsive { seq: SeqNum },
}

impl From<SessionError> for ConnError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::HandshakeTimeout { attempts } => ConnError::HandshakeTimeout { attempts },
            other => ConnError::Session(other),
        }
    }
}

/// Summary of a completed sender session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Records accepted into the window (each with its own sequence number).
    pub records: u64,
    /// `DATA` re-sends, whether NACK- or timeout-driven.
    pub retransmissions: u64,
    pub nacks_received: u64,
    /// Records skipped because they exceeded `max_record_size`.
    pub rejected: u64,
    pub hello_attempts: u32,
    /// `false` when the close retries ran out without a `CLOSE ACK`.
    pub close_acknowledged: bool,
}

/// Summary of a completed receiver session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub delivered: u64,
    pub duplicates: u64,
    pub gaps: u64,
    /// Datagrams discarded because they failed to decode.
    pub malformed: u64,
    pub handshakes: u32,
}

// ---------------------------------------------------------------------------
// SenderConnection
// ---------------------------------------------------------------------------

/// The sending end of a session.
pub struct SenderConnection<T> {
    events: EventLoop<T>,
    stop: StopHandle,
    group: SocketAddr,
    /// Receiver that answered the handshake first.
    peer: Option<SocketAddr>,
    config: ArqConfig,
    session: Session,
    window: SendWindow,
    /// A record the window refused while full, to be offered again first.
    pending: Option<Vec<u8>>,
    report: TransferReport,
}

impl<T: Transport> SenderConnection<T> {
    /// Build an idle sender that will transmit to `group`.
    pub fn new(transport: Arc<T>, group: SocketAddr, config: ArqConfig) -> Result<Self, ConnError> {
        config.validate()?;
        let (stop, stop_rx) = stop_channel();
        Ok(Self {
            events: EventLoop::new(transport, config.timers.handshake_retry_interval, stop_rx),
            stop,
            group,
            peer: None,
            session: Session::sender(&config),
            window: SendWindow::from_config(&config),
            pending: None,
            report: TransferReport::default(),
            config,
        })
    }

    /// [`SenderConnection::new`] followed by [`SenderConnection::handshake`].
    pub async fn connect(
        transport: Arc<T>,
        group: SocketAddr,
        config: ArqConfig,
    ) -> Result<Self, ConnError> {
        let mut conn = Self::new(transport, group, config)?;
        conn.handshake().await?;
        Ok(conn)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn window(&self) -> &SendWindow {
        &self.window
    }

    pub fn report(&self) -> &TransferReport {
        &self.report
    }

    /// Handshake, transfer every record of `source`, then close.
    pub async fn send_stream<S>(&mut self, source: &mut S) -> Result<TransferReport, ConnError>
    where
        S: RecordSource + ?Sized,
    {
        if self.session.phase() == Phase::Idle {
            self.handshake().await?;
        }
        self.transfer(source).await?;
        self.close().await?;
        Ok(self.report.clone())
    }

    /// Send `HELLO` to the group until a receiver answers `HELLO ACK`.
    ///
    /// `HELLO` is repeated every `handshake_retry_interval`; after
    /// `handshake_retry_limit` retries the attempt fails with
    /// [`ConnError::HandshakeTimeout`].
    pub async fn handshake(&mut self) -> Result<(), ConnError> {
        let hello = self.session.start()?;
        self.events
            .set_period(self.config.timers.handshake_retry_interval);
        self.events.send(&hello, self.group).await;
        self.report.hello_attempts = self.session.hello_attempts();

        loop {
            match self.events.next_event().await? {
                Event::Stop => return Err(ConnError::Stopped),
                Event::Tick => {
                    let hello = self.session.handshake_tick()?;
                    self.events.send(&hello, self.group).await;
                    self.report.hello_attempts = self.session.hello_attempts();
                }
                Event::Message { msg, from } => match self.session.on_control(&msg) {
                    Transition::Entered { .. } => {
                        self.peer = Some(from);
                        log::info!(
                            "[arq:sender] session with {from} after {} HELLO(s)",
                            self.report.hello_attempts
                        );
                        return Ok(());
                    }
                    _ => log::debug!("[arq:sender] ignoring {msg} from {from} while handshaking"),
                },
            }
        }
    }

    /// Transmit every record of `source` and wait until all are acknowledged.
    ///
    /// The source is rewound first.  Returns the number of records sent.
    /// Records larger than `max_record_size` are skipped and counted in
    /// [`TransferReport::rejected`].  If the sequence space runs out, the
    /// records already in flight are drained and the session closed before
    /// [`SubmitError::SequenceExhausted`] is returned.
    pub async fn transfer<S>(&mut self, source: &mut S) -> Result<u64, ConnError>
    where
        S: RecordSource + ?Sized,
    {
        if self.session.phase() != Phase::Transferring {
            return Err(ConnError::Session(SessionError::BadPhase {
                role: Role::Sender,
                phase: self.session.phase(),
                action: "transfer",
            }));
        }
        source.rewind().map_err(ConnError::Source)?;
        self.events.set_period(self.config.timers.tick_interval);

        let mut sent = 0u64;
        let mut exhausted = false;
        let mut fatal = None;
        loop {
            // Fill the window.
            while !exhausted {
                let record = match self.pending.take() {
                    Some(record) => record,
                    None => match source.next_record().map_err(ConnError::Source)? {
                        Some(record) => record,
                        None => {
                            exhausted = true;
                            break;
                        }
                    },
                };
                match self.window.submit(record, Instant::now()) {
                    Ok(Submit::Accepted(data)) => {
                        self.events.send(&data, self.group).await;
                        sent += 1;
                        self.report.records += 1;
                    }
                    Ok(Submit::Blocked(record)) => {
                        self.pending = Some(record);
                        break;
                    }
                    Err(SubmitError::RecordTooLarge { len, max }) => {
                        log::warn!("[arq:sender] skipping record of {len} bytes (limit {max})");
                        self.report.rejected += 1;
                    }
                    Err(e @ SubmitError::SequenceExhausted) => {
                        log::error!("[arq:sender] {e}; finishing the records in flight");
                        fatal = Some(e);
                        exhausted = true;
                    }
                }
            }

            if exhausted && self.window.is_drained() {
                if let Some(e) = fatal {
                    self.close().await?;
                    return Err(ConnError::Submit(e));
                }
                log::info!("[arq:sender] all {sent} record(s) acknowledged");
                return Ok(sent);
            }

            match self.events.next_event().await? {
                Event::Stop => return Err(ConnError::Stopped),
                Event::Tick => self.on_tick().await?,
                Event::Message { msg, from } => {
                    if self.peer != Some(from) {
                        log::debug!("[arq:sender] ignoring {msg} from non-peer {from}");
                        continue;
                    }
                    self.on_feedback(msg).await;
                }
            }
        }
    }

    /// Send `CLOSE` until `CLOSE ACK` arrives or the retries run out.
    ///
    /// Returns `true` when the receiver acknowledged the close.
    pub async fn close(&mut self) -> Result<bool, ConnError> {
        let close = self.session.begin_close()?;
        self.events.set_period(self.config.timers.close_retry_interval);
        self.events.send(&close, self.group).await;

        loop {
            match self.events.next_event().await? {
                Event::Stop => return Err(ConnError::Stopped),
                Event::Tick => match self.session.close_tick() {
                    Some(close) => {
                        self.events.send(&close, self.group).await;
                    }
                    None => {
                        log::warn!("[arq:sender] no CLOSE ACK; closed without confirmation");
                        self.report.close_acknowledged = false;
                        return Ok(false);
                    }
                },
                Event::Message { msg, from } if self.peer == Some(from) => {
                    if let Transition::Entered { .. } = self.session.on_control(&msg) {
                        self.report.close_acknowledged = true;
                        return Ok(true);
                    }
                }
                Event::Message { msg, from } => {
                    log::debug!("[arq:sender] ignoring {msg} from non-peer {from}");
                }
            }
        }
    }

    async fn on_tick(&mut self) -> Result<(), ConnError> {
        for data in self.window.on_tick(Instant::now()) {
            self.report.retransmissions += 1;
            self.events.send(&data, self.group).await;
        }
        if let Some(max) = self.config.max_retransmits {
            if let Some(seq) = self.window.overdue_slot(max) {
                return Err(ConnError::PeerUnresponsive { seq });
            }
        }
        Ok(())
    }

    async fn on_feedback(&mut self, msg: Message) {
        match msg {
            Message::Ack { seq } => match self.window.on_ack(seq) {
                AckOutcome::Advanced(n) => {
                    log::debug!("[arq:sender] ACK {seq}: base → {} (+{n})", self.window.base())
                }
                AckOutcome::Marked => log::debug!("[arq:sender] ACK {seq} marked"),
                AckOutcome::Ignored => log::trace!("[arq:sender] stale ACK {seq}"),
            },
            Message::Nack { seq } => {
                self.report.nacks_received += 1;
                if let Some(data) = self.window.on_nack(seq, Instant::now()) {
                    log::debug!("[arq:sender] NACK {seq}: retransmitting");
                    self.report.retransmissions += 1;
                    self.events.send(&data, self.group).await;
                }
            }
            other => {
                if self.session.on_control(&other) == Transition::Ignored {
                    log::debug!("[arq:sender] ignoring {other} while transferring");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ReceiverConnection
// ---------------------------------------------------------------------------

/// The receiving end of a session.
pub struct ReceiverConnection<T> {
    events: EventLoop<T>,
    stop: StopHandle,
    config: ArqConfig,
    /// Sender whose `HELLO` opened the session.
    peer: Option<SocketAddr>,
    session: Session,
    sequencer: Sequencer,
}

impl<T: Transport> ReceiverConnection<T> {
    pub fn new(transport: Arc<T>, config: ArqConfig) -> Result<Self, ConnError> {
        config.validate()?;
        let (stop, stop_rx) = stop_channel();
        Ok(Self {
            events: EventLoop::new(transport, config.timers.tick_interval, stop_rx),
            stop,
            config,
            peer: None,
            session: Session::receiver(),
            sequencer: Sequencer::new(),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            delivered: self.sequencer.delivered(),
            duplicates: self.sequencer.duplicates(),
            gaps: self.sequencer.gaps(),
            malformed: self.events.malformed(),
            handshakes: self.session.handshakes(),
        }
    }

    /// Serve one session: wait for `HELLO`, deliver records in order into
    /// `sink` until `CLOSE`, then linger answering duplicate `CLOSE`s.
    pub async fn run<S>(&mut self, sink: &mut S) -> Result<SessionReport, ConnError>
    where
        S: RecordSink + ?Sized,
    {
        while self.session.phase() != Phase::Closed {
            match self.events.next_event().await? {
                Event::Stop => return Err(ConnError::Stopped),
                Event::Tick => {}
                Event::Message { msg, from } => self.on_message(msg, from, sink).await?,
            }
        }

        let report = self.report();
        log::info!(
            "[arq:receiver] session closed: {} delivered, {} duplicate(s), {} gap(s)",
            report.delivered,
            report.duplicates,
            report.gaps
        );
        self.linger().await?;
        Ok(report)
    }

    async fn on_message<S>(&mut self, msg: Message, from: SocketAddr, sink: &mut S) -> Result<(), ConnError>
    where
        S: RecordSink + ?Sized,
    {
        if let Message::Data { seq, payload } = msg {
            if self.session.phase() != Phase::Transferring || self.peer != Some(from) {
                log::debug!("[arq:receiver] ignoring DATA {seq} from {from}");
                return Ok(());
            }
            let reception = self.sequencer.on_data(seq, payload);
            match &reception {
                Reception::Deliver { seq, record } => {
                    sink.deliver(*seq, record).map_err(ConnError::Sink)?;
                }
                Reception::Gap { seq, expected } => {
                    log::debug!("[arq:receiver] DATA {seq} ahead of {expected}")
                }
                Reception::Duplicate { seq } => log::debug!("[arq:receiver] duplicate DATA {seq}"),
            }
            self.events.send(&reception.feedback(), from).await;
            return Ok(());
        }

        if self.peer.is_some_and(|peer| peer != from) {
            log::debug!("[arq:receiver] ignoring {msg} from non-peer {from}");
            return Ok(());
        }
        match self.session.on_control(&msg) {
            Transition::Entered { phase, reply } => {
                if phase == Phase::Transferring {
                    self.peer = Some(from);
                    self.sequencer.reset();
                    log::info!("[arq:receiver] session opened by {from}");
                }
                if let Some(reply) = reply {
                    self.events.send(&reply, from).await;
                }
            }
            Transition::Repeated { reply } => {
                self.events.send(&reply, from).await;
            }
            Transition::Ignored => log::debug!("[arq:receiver] ignoring {msg} from {from}"),
        }
        Ok(())
    }

    /// Keep answering `CLOSE` for `close_linger`, in case our `CLOSE ACK`
    /// was lost.  A stop request ends the linger early.
    async fn linger(&mut self) -> Result<(), ConnError> {
        let deadline = Instant::now() + self.config.timers.close_linger;
        loop {
            let event = match tokio::time::timeout_at(deadline, self.events.next_event()).await {
                Ok(event) => event?,
                Err(_elapsed) => return Ok(()),
            };
            match event {
                Event::Stop => return Ok(()),
                Event::Tick => {}
                Event::Message { msg, from } if self.peer == Some(from) => {
                    if let Transition::Repeated { reply } = self.session.on_control(&msg) {
                        self.events.send(&reply, from).await;
                    }
                }
                Event::Message { .. } => {}
            }
        }
    }
}
