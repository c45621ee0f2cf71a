//! Entry point for `mcast-arq`.
//!
//! Parses CLI arguments and dispatches into either **send** or **receive**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, signal handling, argument parsing).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;

use mcast_arq::event_loop::StopHandle;
use mcast_arq::record::{LineSource, LogFileSink};
use mcast_arq::simulator::{Simulator, SimulatorConfig};
use mcast_arq::socket::UdpTransport;
use mcast_arq::{ArqConfig, ConnError, ReceiverConnection, SenderConnection};

/// Reliable, ordered record delivery over UDP multicast.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send every line of a file to a multicast group.
    Send {
        /// File to send, one record per line.
        #[arg(short, long)]
        file: PathBuf,
        /// Destination group and port (e.g. 239.0.0.1:5000).
        #[arg(short, long)]
        group: SocketAddr,
        /// Local address to bind; defaults to an ephemeral port.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
        /// Multicast TTL / hop limit.
        #[arg(long, default_value_t = 1)]
        hops: u32,
        /// Do not loop group datagrams back to this host.
        #[arg(long)]
        no_loopback: bool,
        #[arg(short, long, default_value_t = 8)]
        window: usize,
        /// Probability of dropping an outbound datagram (testing aid).
        #[arg(long, default_value_t = 0.0)]
        loss_rate: f64,
        /// Seed for --loss-rate.
        #[arg(long)]
        seed: Option<u64>,
        /// Retransmit timeout in milliseconds.
        #[arg(long, default_value_t = 900)]
        rto_ms: u64,
        /// Event-loop tick in milliseconds.
        #[arg(long, default_value_t = 300)]
        tick_ms: u64,
        #[arg(long, default_value_t = 10)]
        handshake_retries: u32,
        #[arg(long, default_value_t = 1024)]
        max_record_size: usize,
        /// Give up when one record was retransmitted this many times.
        #[arg(long)]
        max_retransmits: Option<u32>,
    },
    /// Receive records from a multicast group and append them to a log file.
    Receive {
        /// Group address to join (e.g. 239.0.0.1).
        #[arg(short, long)]
        group: IpAddr,
        #[arg(short, long)]
        port: u16,
        /// Log file that delivered records are appended to.
        #[arg(short, long)]
        output: PathBuf,
        /// IPv6 interface index; 0 lets the OS choose.
        #[arg(long, default_value_t = 0)]
        interface: u32,
        /// Exit after the first session instead of waiting for the next.
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            file,
            group,
            bind,
            hops,
            no_loopback,
            window,
            loss_rate,
            seed,
            rto_ms,
            tick_ms,
            handshake_retries,
            max_record_size,
            max_retransmits,
        } => {
            let mut config = ArqConfig {
                window_size: window,
                max_record_size,
                handshake_retry_limit: handshake_retries,
                max_retransmits,
                ..ArqConfig::default()
            };
            config.timers.retransmit_timeout = Duration::from_millis(rto_ms);
            config.timers.tick_interval = Duration::from_millis(tick_ms);

            let bind = bind.unwrap_or_else(|| match group {
                SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
            });
            let socket = UdpTransport::sender(bind, hops, !no_loopback)
                .with_context(|| format!("binding sender socket on {bind}"))?;
            let transport = Arc::new(
                Simulator::new(socket, SimulatorConfig::lossy(loss_rate, seed))
                    .context("invalid --loss-rate")?,
            );
            let mut source = LineSource::open(&file)
                .with_context(|| format!("opening {}", file.display()))?;

            log::info!("Sending {} to {group}", file.display());
            let mut conn = SenderConnection::new(Arc::clone(&transport), group, config)?;
            let watcher = stop_on_ctrl_c(conn.stop_handle());
            let result = conn.send_stream(&mut source).await;
            watcher.abort();

            let report = result.context("transfer failed")?;
            println!(
                "sent {} record(s), skipped {}: {} retransmission(s), {} NACK(s), {} HELLO(s), close {}",
                report.records,
                report.rejected,
                report.retransmissions,
                report.nacks_received,
                report.hello_attempts,
                if report.close_acknowledged {
                    "acknowledged"
                } else {
                    "unconfirmed"
                }
            );
            let stats = transport.stats();
            if stats.dropped > 0 {
                log::info!("Simulated loss dropped {} of {} datagram(s)", stats.dropped, stats.offered);
            }
        }
        Mode::Receive {
            group,
            port,
            output,
            interface,
            once,
        } => {
            let transport = Arc::new(
                UdpTransport::join(group, port, interface)
                    .with_context(|| format!("joining {group} on port {port}"))?,
            );
            let mut sink = LogFileSink::append(&output)
                .with_context(|| format!("opening {}", output.display()))?;

            log::info!("Receiving on {group}:{port} into {}", output.display());
            loop {
                let mut conn = ReceiverConnection::new(Arc::clone(&transport), ArqConfig::default())?;
                let watcher = stop_on_ctrl_c(conn.stop_handle());
                let result = conn.run(&mut sink).await;
                watcher.abort();

                match result {
                    Ok(report) => println!(
                        "session done: {} delivered, {} duplicate(s), {} gap(s), {} malformed",
                        report.delivered, report.duplicates, report.gaps, report.malformed
                    ),
                    Err(ConnError::Stopped) => break,
                    Err(e) => return Err(e).context("receive failed"),
                }
                if once {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Trigger `stop` on Ctrl-C.  Abort the returned task once the connection
/// is done.
fn stop_on_ctrl_c(stop: StopHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted; stopping");
            stop.stop();
        }
    })
}
