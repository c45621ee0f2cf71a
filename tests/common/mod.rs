//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;

use mcast_arq::event_loop::StopHandle;
use mcast_arq::transport::{MemoryNetwork, MemoryTransport, Transport};
use mcast_arq::{ArqConfig, ConnError, ReceiverConnection, SeqNum, SessionReport};

pub type Delivered = Vec<(SeqNum, Vec<u8>)>;
pub type ReceiverTask = JoinHandle<(Result<SessionReport, ConnError>, Delivered)>;

pub const SENDER_PORT: u16 = 4000;
pub const GROUP_PORT: u16 = 9000;

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub fn group() -> SocketAddr {
    addr(GROUP_PORT)
}

/// A receiver endpoint at `127.0.0.1:<port>` that has joined the group.
pub fn receiver_endpoint(net: &MemoryNetwork, port: u16) -> MemoryTransport {
    let t = net.bind(addr(port)).unwrap();
    t.join(group());
    t
}

/// Run a receiver session in the background, collecting delivered records.
pub fn spawn_receiver<T>(transport: Arc<T>, config: ArqConfig) -> (StopHandle, ReceiverTask)
where
    T: Transport + 'static,
{
    let mut rx = ReceiverConnection::new(transport, config).unwrap();
    let stop = rx.stop_handle();
    let task = tokio::spawn(async move {
        let mut sink = Delivered::new();
        let result = rx.run(&mut sink).await;
        (result, sink)
    });
    (stop, task)
}

pub fn records(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("R{i}")).collect()
}

pub fn expected(n: usize) -> Delivered {
    (0..n)
        .map(|i| (i as SeqNum, format!("R{i}").into_bytes()))
        .collect()
}
