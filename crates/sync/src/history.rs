//! History catch-up for a joining peer
//!
//! The joiner announces itself, waits for answers, then asks the peer with
//! the longest advertised log to stream it over unicast UDP, one record per
//! datagram. The stream has no end marker: the receiver stops once it has
//! the advertised count or when a datagram fails to arrive in time.

use crate::action_log::{ActionLog, LogSnapshot};
use crate::broadcast::BusHandle;
use crate::config::SyncConfig;
use crate::error::ReplicationError;
use crate::identity::LocalIdentity;
use crate::peers::{PeerDirectory, PeerEntry};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use whiteboard_wire::{ActionRecord, Control, ControlRecord, Envelope, PeerAddr};

/// Outcome of a catch-up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUp {
    /// Peers known after the discovery window
    pub peers: usize,
    /// Peer the history was requested from, if any
    pub source: Option<PeerEntry>,
    /// Records the source advertised
    pub expected: u64,
    /// Records actually received
    pub received: usize,
}

impl CatchUp {
    /// True when the source delivered everything it advertised
    pub fn is_complete(&self) -> bool {
        self.received as u64 >= self.expected
    }
}

pub struct HistoryReplicator {
    identity: LocalIdentity,
    bus: BusHandle,
    directory: PeerDirectory,
    log: ActionLog,
    port: u16,
    window: Duration,
    timeout: Duration,
    recv_buffer: usize,
    token: CancellationToken,
}

impl HistoryReplicator {
    pub fn new(
        identity: LocalIdentity,
        config: &SyncConfig,
        bus: BusHandle,
        directory: PeerDirectory,
        log: ActionLog,
        token: CancellationToken,
    ) -> Self {
        Self {
            identity,
            bus,
            directory,
            log,
            port: config.history_port,
            window: config.discovery_window(),
            timeout: config.history_timeout(),
            recv_buffer: config.recv_buffer(),
            token,
        }
    }

    /// Broadcast a discovery query and collect answers for the window
    ///
    /// Returns the number of known peers once the window closes.
    pub async fn discover(&self) -> usize {
        let history_len = self.log.len() as u64;
        self.bus.send(ControlRecord::new(
            self.identity.id(),
            Control::PeerQuery {
                addr: self.identity.addr(self.port),
                history_len,
            },
        ));
        tracing::debug!("Peer query sent (history {}), waiting {:?}", history_len, self.window);

        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep(self.window) => {}
        }
        self.directory.len()
    }

    /// Pull the log of the longest-history peer, handing each record to `sink`
    ///
    /// With no candidate in the directory this returns at once. Timeouts end
    /// the transfer normally; only failing to bind the receiver is an error.
    pub async fn pull<F>(&self, mut sink: F) -> Result<CatchUp, ReplicationError>
    where
        F: FnMut(ActionRecord),
    {
        let mut report = CatchUp {
            peers: self.directory.len(),
            ..Default::default()
        };
        let Some(source) = self.directory.longest_history_peer() else {
            tracing::info!("No history source, starting with an empty log");
            return Ok(report);
        };
        report.source = Some(source);
        report.expected = source.history_len;

        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port))
            .await
            .map_err(|source| ReplicationError::Bind {
                port: self.port,
                source,
            })?;
        let port = socket
            .local_addr()
            .map(|addr| addr.port())
            .map_err(|source| ReplicationError::Bind {
                port: self.port,
                source,
            })?;

        self.bus.send(ControlRecord::new(
            self.identity.id(),
            Control::HistoryRequest {
                target: source.id,
                reply_to: self.identity.addr(port),
            },
        ));
        tracing::info!(
            "Requesting {} records from {} at {}",
            source.history_len,
            source.id,
            source.addr
        );

        let mut buf = vec![0u8; self.recv_buffer];
        while (report.received as u64) < report.expected {
            let received = tokio::select! {
                _ = self.token.cancelled() => break,
                received = tokio::time::timeout(self.timeout, socket.recv_from(&mut buf)) => received,
            };
            let (len, from) = match received {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    tracing::warn!("History receive error: {}", e);
                    continue;
                }
                Err(_) => {
                    tracing::debug!(
                        "History stream went quiet after {} of {} records",
                        report.received,
                        report.expected
                    );
                    break;
                }
            };

            match Envelope::from_bytes(&buf[..len]) {
                Ok(Envelope::Action(record)) => {
                    sink(record);
                    report.received += 1;
                }
                Ok(Envelope::Control(control)) => {
                    tracing::warn!("Ignoring {:?} on history port from {}", control.kind(), from);
                }
                Err(e) => tracing::warn!("Dropping history datagram from {}: {}", from, e),
            }
        }

        tracing::info!(
            "Catch-up finished: {} of {} records from {}",
            report.received,
            report.expected,
            source.id
        );
        Ok(report)
    }

    /// Discovery followed by a pull
    pub async fn catch_up<F>(&self, sink: F) -> Result<CatchUp, ReplicationError>
    where
        F: FnMut(ActionRecord),
    {
        let peers = self.discover().await;
        tracing::debug!("Discovery window closed with {} peers", peers);
        self.pull(sink).await
    }
}

/// Responder side: stream `snapshot` to `reply_to`, one record per datagram
///
/// Returns how many records were sent. Individual send failures are logged
/// and skipped.
pub async fn serve(snapshot: LogSnapshot, reply_to: PeerAddr) -> std::io::Result<usize> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
    let target = reply_to.socket_addr();
    let mut sent = 0;
    for record in &snapshot {
        let data = Envelope::from(*record).to_bytes();
        match socket.send_to(&data, target).await {
            Ok(_) => sent += 1,
            Err(e) => tracing::warn!("History send to {} failed: {}", reply_to, e),
        }
    }
    tracing::info!("Served {} history records to {}", sent, reply_to);
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::outbound_channel;
    use whiteboard_wire::{Action, PeerId};

    fn test_config() -> SyncConfig {
        SyncConfig {
            history_port: 0,
            discovery_window_ms: 50,
            history_timeout_ms: 300,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_directory_completes_immediately() {
        let (bus, mut outbound) = outbound_channel();
        let log = ActionLog::new();
        let replicator = HistoryReplicator::new(
            LocalIdentity::new(PeerId(1), Ipv4Addr::LOCALHOST),
            &test_config(),
            bus,
            PeerDirectory::new(),
            log.clone(),
            CancellationToken::new(),
        );

        let report = replicator.pull(|record| { log.append(record); }).await.unwrap();
        assert_eq!(report, CatchUp::default());
        assert!(report.is_complete());
        assert!(log.is_empty());
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_discover_announces_history_len() {
        let (bus, mut outbound) = outbound_channel();
        let log = ActionLog::new();
        log.append(ActionRecord::new(PeerId(1), Action::Clear));
        let replicator = HistoryReplicator::new(
            LocalIdentity::new(PeerId(1), Ipv4Addr::LOCALHOST),
            &test_config(),
            bus,
            PeerDirectory::new(),
            log,
            CancellationToken::new(),
        );

        assert_eq!(replicator.discover().await, 0);
        let query = outbound.recv().await.unwrap();
        assert!(matches!(
            query,
            Envelope::Control(ControlRecord {
                control: Control::PeerQuery { history_len: 1, .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_pull_stops_waiting() {
        let (bus, _outbound) = outbound_channel();
        let directory = PeerDirectory::new();
        directory.add_peer(PeerEntry::new(
            PeerId(2),
            PeerAddr::new(Ipv4Addr::LOCALHOST, 9),
            4,
        ));
        let token = CancellationToken::new();
        let config = SyncConfig {
            history_timeout_ms: 60_000,
            ..test_config()
        };
        let replicator = HistoryReplicator::new(
            LocalIdentity::new(PeerId(1), Ipv4Addr::LOCALHOST),
            &config,
            bus,
            directory,
            ActionLog::new(),
            token.clone(),
        );

        token.cancel();
        let report = tokio::time::timeout(Duration::from_secs(2), replicator.pull(|_| {}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.received, 0);
        assert_eq!(report.expected, 4);
        assert!(!report.is_complete());
    }
}
