//! Network simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate datagrams.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`Simulator`] wraps any [`Transport`] and applies a fault model to every
//! outbound datagram:
//!
//! | Fault        | Description                                              |
//! |--------------|----------------------------------------------------------|
//! | Drop rule    | Drop every datagram a caller-supplied predicate selects. |
//! | Packet loss  | Drop with probability `loss_rate`.                       |
//! | Duplication  | Send twice with probability `duplicate_rate`.            |
//! | Reordering   | With probability `reorder_rate`, hold the datagram back  |
//! |              | and release it right after the next one.                 |
//!
//! Receives pass straight through.  The RNG is a seedable `StdRng`, so a
//! failing run can be replayed from its seed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::transport::{Datagram, Transport, TransportError};

/// Predicate deciding whether an outbound datagram is lost.
pub type DropRule = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is sent twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram is overtaken by the next one.
    pub reorder_rate: f64,
    /// RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulatorError {
    #[error("{name} must be within [0, 1], got {value}")]
    Rate { name: &'static str, value: f64 },
}

impl SimulatorConfig {
    /// A lossy network with the given drop probability and nothing else.
    pub fn lossy(loss_rate: f64, seed: Option<u64>) -> Self {
        Self {
            loss_rate,
            seed,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SimulatorError> {
        for (name, value) in [
            ("loss_rate", self.loss_rate),
            ("duplicate_rate", self.duplicate_rate),
            ("reorder_rate", self.reorder_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimulatorError::Rate { name, value });
            }
        }
        Ok(())
    }
}

/// Snapshot of the simulator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    /// Datagrams offered to `send_to`.
    pub offered: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

struct Faults {
    rng: StdRng,
    rule: Option<DropRule>,
    held: Option<(Vec<u8>, SocketAddr)>,
}

/// A fault-injecting wrapper around a [`Transport`].
pub struct Simulator<T> {
    inner: T,
    config: SimulatorConfig,
    faults: Mutex<Faults>,
    offered: AtomicU64,
    dropped: AtomicU64,
    duplicated: AtomicU64,
    reordered: AtomicU64,
}

impl<T: Transport> Simulator<T> {
    pub fn new(inner: T, config: SimulatorConfig) -> Result<Self, SimulatorError> {
        config.validate()?;
        Ok(Self::build(inner, config))
    }

    /// A pass-through simulator (no faults).
    pub fn transparent(inner: T) -> Self {
        Self::build(
            inner,
            SimulatorConfig {
                seed: Some(0),
                ..SimulatorConfig::default()
            },
        )
    }

    fn build(inner: T, config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            inner,
            config,
            faults: Mutex::new(Faults {
                rng,
                rule: None,
                held: None,
            }),
            offered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            duplicated: AtomicU64::new(0),
            reordered: AtomicU64::new(0),
        }
    }

    /// Drop every outbound datagram for which `rule` returns `true`, in
    /// addition to the random faults.
    pub fn with_drop_rule(self, rule: impl FnMut(&[u8]) -> bool + Send + 'static) -> Self {
        self.lock().rule = Some(Box::new(rule));
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn stats(&self) -> SimulatorStats {
        SimulatorStats {
            offered: self.offered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            duplicated: self.duplicated.load(Ordering::Relaxed),
            reordered: self.reordered.load(Ordering::Relaxed),
        }
    }

    /// Send any datagram still held back for reordering.
    pub async fn flush(&self) -> Result<(), TransportError> {
        let held = self.lock().held.take();
        if let Some((bytes, dest)) = held {
            self.inner.send_to(&bytes, dest).await?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide the fate of one datagram.  Returns what to put on the wire now,
    /// in order.
    fn plan(&self, datagram: &[u8], dest: SocketAddr) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut guard = self.lock();
        let faults = &mut *guard;

        let ruled_out = faults.rule.as_mut().is_some_and(|rule| rule(datagram));
        if ruled_out || faults.rng.random_bool(self.config.loss_rate) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!("[sim] drop {:?}", String::from_utf8_lossy(datagram));
            return Vec::new();
        }

        let copies = if faults.rng.random_bool(self.config.duplicate_rate) {
            self.duplicated.fetch_add(1, Ordering::Relaxed);
            2
        } else {
            1
        };

        if faults.held.is_none() && faults.rng.random_bool(self.config.reorder_rate) {
            self.reordered.fetch_add(1, Ordering::Relaxed);
            faults.held = Some((datagram.to_vec(), dest));
            // The duplicate, if any, still goes out now and overtakes the held copy.
            return vec![(datagram.to_vec(), dest); copies - 1];
        }

        let mut out = vec![(datagram.to_vec(), dest); copies];
        out.extend(faults.held.take());
        out
    }
}

#[async_trait]
impl<T: Transport> Transport for Simulator<T> {
    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        self.offered.fetch_add(1, Ordering::Relaxed);
        for (bytes, to) in self.plan(datagram, dest) {
            self.inner.send_to(&bytes, to).await?;
        }
        Ok(())
    }

    async fn recv_from(&self) -> Result<Datagram, TransportError> {
        self.inner.recv_from().await
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}

impl<T> std::fmt::Debug for Simulator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
