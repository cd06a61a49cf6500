//! Plain UDP forwarder: every datagram received on the source socket is sent
//! unchanged to the destination.

use log::{info, warn};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::constants::{CHUNK_SIZE, MAX_DATAGRAM_SIZE};
use crate::deliver::stop_requested;

/// Counters of a finished relay
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub datagrams: u64,
    pub bytes: u64,
    pub send_errors: u64,
}

/// Forwards datagrams until `stop` turns true or the source socket fails.
pub async fn forward(
    source: &UdpSocket,
    destination: &UdpSocket,
    mut stop: watch::Receiver<bool>,
) -> std::io::Result<RelayStats> {
    let mut stats = RelayStats::default();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let n = tokio::select! {
            r = source.recv(&mut buf) => r?,
            _ = stop_requested(&mut stop) => break,
        };
        if n == 0 {
            continue;
        }
        if n > CHUNK_SIZE {
            warn!("relaying oversized datagram of {n} bytes");
        }
        match destination.send(&buf[..n]).await {
            Ok(sent) => {
                stats.datagrams += 1;
                stats.bytes += sent as u64;
            }
            Err(e) => {
                stats.send_errors += 1;
                warn!("relay send failed: {e}");
            }
        }
    }

    info!(
        "relay stopped: {} datagrams, {} bytes, {} send errors",
        stats.datagrams, stats.bytes, stats.send_errors
    );
    Ok(stats)
}
