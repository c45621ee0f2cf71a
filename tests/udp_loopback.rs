//! Integration tests over real UDP sockets on loopback.
//!
//! The "group" is the receiver's unicast address, so the tests run on hosts
//! without multicast routing.  Timers are shortened to keep wall-clock time
//! low.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mcast_arq::record::{LineSource, LogFileSink};
use mcast_arq::simulator::{Simulator, SimulatorConfig};
use mcast_arq::socket::UdpTransport;
use mcast_arq::transport::Transport;
use mcast_arq::{ArqConfig, ReceiverConnection, SenderConnection, TimerConfig};

use common::*;

fn quick_config() -> ArqConfig {
    ArqConfig {
        window_size: 4,
        close_retry_limit: 10,
        timers: TimerConfig::uniform(Duration::from_millis(20)),
        ..ArqConfig::default()
    }
}

async fn bind_loopback() -> UdpTransport {
    UdpTransport::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
        .await
        .expect("bind loopback socket")
}

#[tokio::test]
async fn records_cross_real_sockets() {
    let rx_transport = Arc::new(bind_loopback().await);
    let dest = rx_transport.local_addr();
    let (_stop, rx_task) = spawn_receiver(rx_transport, quick_config());

    let tx_transport = Arc::new(bind_loopback().await);
    let mut tx = SenderConnection::new(tx_transport, dest, quick_config()).unwrap();
    let report = tokio::time::timeout(
        Duration::from_secs(10),
        tx.send_stream(&mut mcast_arq::record::MemorySource::new(records(20))),
    )
    .await
    .expect("transfer timed out")
    .expect("transfer failed");
    assert_eq!(report.records, 20);

    let (result, delivered) = tokio::time::timeout(Duration::from_secs(5), rx_task)
        .await
        .expect("receiver did not finish")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(delivered, expected(20));
}

/// File in, log file out, with a lossy sender.
#[tokio::test]
async fn file_to_log_file_under_loss() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("records.txt");
    let output = dir.path().join("received.log");
    let lines: Vec<String> = (0..15).map(|i| format!("line {i}")).collect();
    std::fs::write(&input, lines.join("\n")).unwrap();

    let rx_transport = Arc::new(bind_loopback().await);
    let dest = rx_transport.local_addr();
    let mut rx = ReceiverConnection::new(rx_transport, quick_config()).unwrap();
    let out_path = output.clone();
    let rx_task = tokio::spawn(async move {
        let mut sink = LogFileSink::append(&out_path).unwrap();
        rx.run(&mut sink).await
    });

    let lossy = Simulator::new(bind_loopback().await, SimulatorConfig::lossy(0.25, Some(5))).unwrap();
    let mut tx = SenderConnection::new(Arc::new(lossy), dest, quick_config()).unwrap();
    let mut source = LineSource::open(&input).unwrap();
    tokio::time::timeout(Duration::from_secs(20), tx.send_stream(&mut source))
        .await
        .expect("transfer timed out")
        .expect("transfer failed");

    let rx_report = tokio::time::timeout(Duration::from_secs(5), rx_task)
        .await
        .expect("receiver did not finish")
        .unwrap()
        .unwrap();
    assert_eq!(rx_report.delivered, 15);

    let text = std::fs::read_to_string(&output).unwrap();
    let got: Vec<&str> = text.lines().collect();
    assert_eq!(got.len(), 15);
    for (i, line) in got.iter().enumerate() {
        assert!(line.ends_with(&format!(" - Seq {i}: line {i}")), "{line}");
    }
}
