//! Datagram transport abstraction.
//!
//! The protocol engine never touches a socket directly.  It talks to a
//! [`Transport`]: something that can send a datagram to an address and
//! hand back the next datagram that arrived, with no ordering or delivery
//! guarantee whatsoever.
//!
//! Implementations:
//! - [`crate::socket::UdpTransport`]: real UDP, unicast or multicast.
//! - [`MemoryTransport`]: in-process endpoints on a [`MemoryNetwork`],
//!   used by the tests and by anyone embedding the engine without a network.
//! - [`crate::simulator::Simulator`]: fault-injecting wrapper around any of
//!   the above.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// A datagram together with its source address.
pub type Datagram = (Vec<u8>, SocketAddr);

/// Errors raised by a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying I/O error from the OS.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    /// The address is already bound on this network.
    #[error("address {0} already in use")]
    AddrInUse(SocketAddr),
    /// The transport has been shut down and will never yield data again.
    #[error("transport closed")]
    Closed,
}

/// Unreliable, unordered datagram delivery.
///
/// `recv_from` must be cancel-safe: the event loop races it against the
/// tick timer and drops it when the timer wins.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to `dest` (unicast or group address).
    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), TransportError>;

    /// Wait for the next datagram.
    async fn recv_from(&self) -> Result<Datagram, TransportError>;

    /// Wait at most `timeout` for the next datagram.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Datagram>, TransportError> {
        match tokio::time::timeout(timeout, self.recv_from()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Address this endpoint is bound to.
    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        (**self).send_to(datagram, dest).await
    }

    async fn recv_from(&self) -> Result<Datagram, TransportError> {
        (**self).recv_from().await
    }

    fn local_addr(&self) -> SocketAddr {
        (**self).local_addr()
    }
}

// ---------------------------------------------------------------------------
// MemoryNetwork
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct NetworkState {
    endpoints: HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    groups: HashMap<SocketAddr, HashSet<SocketAddr>>,
}

/// An in-process datagram network.
///
/// Endpoints are identified by [`SocketAddr`].  Sending to an address that
/// is a joined group fans the datagram out to every member except the
/// sender; sending to an unknown address silently loses it, as UDP would.
/// The network itself never drops, duplicates or reorders; wrap endpoints
/// in a [`crate::simulator::Simulator`] for that.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint at `addr`.
    pub fn bind(&self, addr: SocketAddr) -> Result<MemoryTransport, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if state.endpoints.contains_key(&addr) {
            return Err(TransportError::AddrInUse(addr));
        }
        state.endpoints.insert(addr, tx);
        Ok(MemoryTransport {
            addr,
            network: self.clone(),
            inbox: tokio::sync::Mutex::new(rx),
        })
    }

    /// Subscribe `member` to datagrams sent to `group`.
    pub fn join(&self, group: SocketAddr, member: SocketAddr) {
        self.lock().groups.entry(group).or_default().insert(member);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        // A poisoned map is still structurally sound; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn route(&self, from: SocketAddr, dest: SocketAddr) -> Vec<mpsc::UnboundedSender<Datagram>> {
        let state = self.lock();
        match state.groups.get(&dest) {
            Some(members) => members
                .iter()
                .filter(|&&m| m != from)
                .filter_map(|m| state.endpoints.get(m).cloned())
                .collect(),
            None => state.endpoints.get(&dest).cloned().into_iter().collect(),
        }
    }

    fn detach(&self, addr: SocketAddr) {
        let mut state = self.lock();
        state.endpoints.remove(&addr);
        for members in state.groups.values_mut() {
            members.remove(&addr);
        }
    }
}

/// One endpoint on a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    addr: SocketAddr,
    network: MemoryNetwork,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl MemoryTransport {
    /// Subscribe this endpoint to `group`.
    pub fn join(&self, group: SocketAddr) {
        self.network.join(group, self.addr);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        for tx in self.network.route(self.addr, dest) {
            // A receiver that hung up is just another lost datagram.
            let _ = tx.send((datagram.to_vec(), self.addr));
        }
        Ok(())
    }

    async fn recv_from(&self) -> Result<Datagram, TransportError> {
        self.inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.detach(self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn unicast_delivery_carries_source() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1)).unwrap();
        let b = net.bind(addr(2)).unwrap();

        a.send_to(b"ping", addr(2)).await.unwrap();
        let (bytes, from) = b.recv_from().await.unwrap();
        assert_eq!(bytes, b"ping");
        assert_eq!(from, addr(1));
    }

    #[tokio::test]
    async fn group_fans_out_but_not_to_sender() {
        let net = MemoryNetwork::new();
        let group = addr(9000);
        let s = net.bind(addr(1)).unwrap();
        let r1 = net.bind(addr(2)).unwrap();
        let r2 = net.bind(addr(3)).unwrap();
        s.join(group);
        r1.join(group);
        r2.join(group);

        s.send_to(b"HELLO", group).await.unwrap();
        assert_eq!(r1.recv_from().await.unwrap().0, b"HELLO");
        assert_eq!(r2.recv_from().await.unwrap().0, b"HELLO");
        let own = s.recv_timeout(Duration::from_millis(20)).await.unwrap();
        assert!(own.is_none());
    }

    #[tokio::test]
    async fn unknown_destination_is_silently_lost() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1)).unwrap();
        assert!(a.send_to(b"void", addr(77)).await.is_ok());
    }

    #[tokio::test]
    async fn double_bind_fails() {
        let net = MemoryNetwork::new();
        let _a = net.bind(addr(1)).unwrap();
        assert!(matches!(
            net.bind(addr(1)),
            Err(TransportError::AddrInUse(_))
        ));
    }

    #[tokio::test]
    async fn dropped_endpoint_frees_address() {
        let net = MemoryNetwork::new();
        drop(net.bind(addr(1)).unwrap());
        assert!(net.bind(addr(1)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn recv_timeout_returns_none_when_idle() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1)).unwrap();
        let got = a.recv_timeout(Duration::from_secs(1)).await.unwrap();
        assert!(got.is_none());
    }
}
