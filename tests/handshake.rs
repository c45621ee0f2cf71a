//! Integration tests for the HELLO / HELLO ACK handshake.
//!
//! Every test runs on a paused tokio clock over an in-process network, so
//! retry intervals elapse instantly and deterministically.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mcast_arq::record::MemorySource;
use mcast_arq::simulator::Simulator;
use mcast_arq::state::Phase;
use mcast_arq::transport::MemoryNetwork;
use mcast_arq::{ArqConfig, ConnError, SenderConnection};

use common::*;

/// A receiver whose first two HELLO ACKs are lost: the sender must send
/// HELLO three times and both sides enter `Transferring` exactly once.
#[tokio::test(start_paused = true)]
async fn lost_hello_acks_are_retried() {
    let net = MemoryNetwork::new();

    let mut acks_seen = 0;
    let rx_transport = Arc::new(
        Simulator::transparent(receiver_endpoint(&net, 5001)).with_drop_rule(move |d| {
            if d == b"HELLO ACK" {
                acks_seen += 1;
                acks_seen <= 2
            } else {
                false
            }
        }),
    );
    let (_stop, rx_task) = spawn_receiver(rx_transport, ArqConfig::default());

    let hellos = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hellos);
    let tx_transport = Arc::new(
        Simulator::transparent(net.bind(addr(SENDER_PORT)).unwrap()).with_drop_rule(move |d| {
            if d == b"HELLO" {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            false
        }),
    );

    let mut tx = SenderConnection::connect(tx_transport, group(), ArqConfig::default())
        .await
        .unwrap();
    assert_eq!(tx.phase(), Phase::Transferring);
    assert_eq!(tx.peer(), Some(addr(5001)));
    assert_eq!(tx.report().hello_attempts, 3);
    assert_eq!(hellos.load(Ordering::SeqCst), 3);

    let report = tx.send_stream(&mut MemorySource::new(records(2))).await.unwrap();
    assert!(report.close_acknowledged);
    assert_eq!(report.hello_attempts, 3);

    let (result, delivered) = rx_task.await.unwrap();
    let rx_report = result.unwrap();
    assert_eq!(rx_report.handshakes, 1);
    assert_eq!(delivered, expected(2));
}

#[tokio::test(start_paused = true)]
async fn silent_group_fails_with_handshake_timeout() {
    let net = MemoryNetwork::new();
    let tx_transport = Arc::new(net.bind(addr(SENDER_PORT)).unwrap());
    let config = ArqConfig {
        handshake_retry_limit: 4,
        ..ArqConfig::default()
    };

    let err = SenderConnection::connect(tx_transport, group(), config)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ConnError::HandshakeTimeout { attempts: 5 }));
}

/// The sender locks on to the first receiver to answer; later answers from
/// other receivers do not change the peer.
#[tokio::test(start_paused = true)]
async fn first_responder_becomes_peer() {
    let net = MemoryNetwork::new();
    let first = Arc::new(receiver_endpoint(&net, 5001));
    let second = Arc::new(receiver_endpoint(&net, 5002));
    let (_s1, t1) = spawn_receiver(first, ArqConfig::default());
    let (_s2, t2) = spawn_receiver(second, ArqConfig::default());

    let tx_transport = Arc::new(net.bind(addr(SENDER_PORT)).unwrap());
    let mut tx = SenderConnection::new(tx_transport, group(), ArqConfig::default()).unwrap();
    let report = tx.send_stream(&mut MemorySource::new(records(4))).await.unwrap();

    let peer = tx.peer().unwrap();
    assert!(peer == addr(5001) || peer == addr(5002));
    assert_eq!(report.records, 4);

    // With a loss-free network both receivers get every record.
    for task in [t1, t2] {
        let (result, delivered) = task.await.unwrap();
        assert_eq!(result.unwrap().handshakes, 1);
        assert_eq!(delivered, expected(4));
    }
}
