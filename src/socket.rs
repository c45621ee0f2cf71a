//! UDP transport.
//!
//! [`UdpTransport`] is a thin wrapper around `tokio::net::UdpSocket` that
//! implements [`Transport`].  Multicast sockets are prepared with `socket2`
//! (address reuse, group membership, TTL and loopback) and then handed to
//! tokio.  All protocol logic lives elsewhere; this module owns only byte I/O.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;

use crate::transport::{Datagram, Transport, TransportError};

/// Maximum UDP payload size.
const MAX_DATAGRAM: usize = 65_535;

/// An async UDP endpoint, unicast or multicast.
#[derive(Debug)]
pub struct UdpTransport {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    local_addr: SocketAddr,
    inner: UdpSocket,
}

impl UdpTransport {
    /// Bind a plain socket to `addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let inner = UdpSocket::bind(addr).await?;
        Self::from_tokio(inner)
    }

    /// A socket for sending to a multicast group.
    ///
    /// `hops` is the IPv4 TTL or IPv6 hop limit of outgoing group datagrams;
    /// `loopback` controls whether they are also delivered to listeners on
    /// this host.
    pub fn sender(bind: SocketAddr, hops: u32, loopback: bool) -> Result<Self, TransportError> {
        let socket = new_socket(&bind)?;
        socket.bind(&SockAddr::from(bind))?;
        match bind {
            SocketAddr::V4(_) => {
                socket.set_multicast_ttl_v4(hops)?;
                socket.set_multicast_loop_v4(loopback)?;
            }
            SocketAddr::V6(_) => {
                socket.set_multicast_hops_v6(hops)?;
                socket.set_multicast_loop_v6(loopback)?;
            }
        }
        let transport = Self::from_socket2(socket)?;
        log::debug!(
            "[udp] multicast sender on {} (hops={hops}, loopback={loopback})",
            transport.local_addr
        );
        Ok(transport)
    }

    /// A socket that receives datagrams sent to `group:port`.
    ///
    /// The socket is bound to the unspecified address of the group's family
    /// with `SO_REUSEADDR`, so several receivers on one host can share the
    /// port.  `interface` is the IPv6 interface index; `0` lets the OS
    /// choose, which is also what IPv4 always does here.
    pub fn join(group: IpAddr, port: u16, interface: u32) -> Result<Self, TransportError> {
        if !group.is_multicast() {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{group} is not a multicast address"),
            )));
        }

        let bind = match group {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
        };
        let socket = new_socket(&bind)?;
        socket.set_reuse_address(true)?;
        socket.bind(&SockAddr::from(bind))?;
        match group {
            IpAddr::V4(g) => socket.join_multicast_v4(&g, &Ipv4Addr::UNSPECIFIED)?,
            IpAddr::V6(g) => socket.join_multicast_v6(&g, interface)?,
        }
        let transport = Self::from_socket2(socket)?;
        log::info!("[udp] joined {group} on port {port}");
        Ok(transport)
    }

    fn from_socket2(socket: Socket) -> Result<Self, TransportError> {
        // tokio requires the std socket to be non-blocking already.
        socket.set_nonblocking(true)?;
        let inner = UdpSocket::from_std(socket.into())?;
        Self::from_tokio(inner)
    }

    fn from_tokio(inner: UdpSocket) -> Result<Self, TransportError> {
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }
}

fn new_socket(addr: &SocketAddr) -> io::Result<Socket> {
    Socket::new(Domain::for_address(*addr), Type::DGRAM, Some(Protocol::UDP))
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        self.inner.send_to(datagram, dest).await?;
        Ok(())
    }

    async fn recv_from(&self) -> Result<Datagram, TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, from) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, from))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
