//! Multicast broadcast bus
//!
//! One send loop drains a FIFO of outbound envelopes onto the group, one
//! receive loop turns inbound datagrams into envelopes for the dispatcher.
//! Both only move traffic while the network switch is on; anything sent or
//! received while it is off is dropped, not buffered.

use crate::config::SyncConfig;
use crate::error::SessionError;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use whiteboard_wire::{Envelope, PeerId, WireError};

/// Capacity of the inbound queue between the receive loop and the dispatcher
const INBOUND_QUEUE: usize = 1024;

/// The local "network enabled" flag
#[derive(Clone, Default)]
pub struct NetworkSwitch(Arc<AtomicBool>);

impl NetworkSwitch {
    /// Turn on. Returns the previous state.
    pub fn enable(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    /// Turn off. Returns the previous state.
    pub fn disable(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle for queueing envelopes onto the bus
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl BusHandle {
    pub fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }

    /// Queue for transmission. Never blocks; returns `false` once the send
    /// loop has shut down.
    pub fn send(&self, envelope: impl Into<Envelope>) -> bool {
        self.tx.send(envelope.into()).is_ok()
    }
}

/// Outbound queue pair
pub fn outbound_channel() -> (BusHandle, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BusHandle::new(tx), rx)
}

/// Envelopes arriving from other peers, in receive order
pub struct Inbound {
    rx: mpsc::Receiver<Envelope>,
}

impl Inbound {
    /// Next envelope, or `None` once the receive loop has stopped
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

/// Multicast transport for one session
pub struct BroadcastBus {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    local_id: PeerId,
    switch: NetworkSwitch,
    recv_buffer: usize,
    handle: BusHandle,
    outbound: mpsc::UnboundedReceiver<Envelope>,
    inbound_tx: mpsc::Sender<Envelope>,
    inbound_rx: Option<mpsc::Receiver<Envelope>>,
}

impl BroadcastBus {
    /// Bind the well-known port and join the multicast group
    ///
    /// Failure here is fatal for the session.
    pub fn bind(
        config: &SyncConfig,
        local_id: PeerId,
        switch: NetworkSwitch,
    ) -> Result<Self, SessionError> {
        let socket = join_group(config)?;
        tracing::info!(
            "Joined multicast group {} on interface {}",
            config.group_addr(),
            config.interface
        );
        Self::from_socket(socket, config.group_addr(), local_id, switch, config.recv_buffer())
    }

    /// Run the bus over an already bound socket, sending to `target`
    pub fn from_socket(
        socket: std::net::UdpSocket,
        target: SocketAddr,
        local_id: PeerId,
        switch: NetworkSwitch,
        recv_buffer: usize,
    ) -> Result<Self, SessionError> {
        let addr = socket
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
        let bind_err = |source| SessionError::Bind {
            what: "broadcast socket",
            addr,
            source,
        };
        socket.set_nonblocking(true).map_err(bind_err)?;
        let socket = UdpSocket::from_std(socket).map_err(bind_err)?;

        let (handle, outbound) = outbound_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

        Ok(Self {
            socket: Arc::new(socket),
            target,
            local_id,
            switch,
            recv_buffer,
            handle,
            outbound,
            inbound_tx,
            inbound_rx: Some(inbound_rx),
        })
    }

    pub fn handle(&self) -> BusHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Take the inbound stream. There is exactly one subscriber per bus.
    pub fn subscribe(&mut self) -> Option<Inbound> {
        self.inbound_rx.take().map(|rx| Inbound { rx })
    }

    /// Start the send and receive loops
    pub fn spawn(self, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let sender = tokio::spawn(run_sender(
            self.socket.clone(),
            self.target,
            self.switch.clone(),
            self.outbound,
            token.clone(),
        ));
        let receiver = tokio::spawn(run_receiver(
            self.socket,
            self.local_id,
            self.switch,
            self.inbound_tx,
            self.recv_buffer,
            token,
        ));
        vec![sender, receiver]
    }
}

fn join_group(config: &SyncConfig) -> Result<std::net::UdpSocket, SessionError> {
    let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.multicast_port));
    let bind_err = |source| SessionError::Bind {
        what: "multicast port",
        addr: bind_addr,
        source,
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    #[cfg(unix)]
    socket.set_reuse_port(true).map_err(bind_err)?;
    socket.bind(&bind_addr.into()).map_err(bind_err)?;
    socket
        .set_multicast_loop_v4(config.multicast_loop)
        .map_err(bind_err)?;
    // Single segment only
    socket.set_multicast_ttl_v4(1).map_err(bind_err)?;
    socket
        .join_multicast_v4(&config.multicast_group, &config.interface)
        .map_err(|source| SessionError::JoinGroup {
            group: config.multicast_group,
            source,
        })?;

    Ok(socket.into())
}

/// Decode a datagram and apply self-suppression
///
/// `Ok(None)` means the envelope is our own traffic echoed back by the group.
pub fn admit(local_id: PeerId, datagram: &[u8]) -> Result<Option<Envelope>, WireError> {
    let envelope = Envelope::from_bytes(datagram)?;
    if envelope.is_from(local_id) {
        return Ok(None);
    }
    Ok(Some(envelope))
}

async fn run_sender(
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    switch: NetworkSwitch,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    token: CancellationToken,
) {
    tracing::debug!("Broadcast sender started, target {}", target);
    loop {
        let envelope = tokio::select! {
            _ = token.cancelled() => break,
            next = outbound.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        if !switch.is_enabled() {
            tracing::trace!("Network off, dropping outbound {:?}", envelope.kind());
            continue;
        }

        let data = envelope.to_bytes();
        match socket.send_to(&data, target).await {
            Ok(_) => tracing::trace!("Sent {:?} ({} bytes)", envelope.kind(), data.len()),
            Err(e) => tracing::warn!("Broadcast send error: {}", e),
        }
    }
    tracing::debug!("Broadcast sender stopped");
}

async fn run_receiver(
    socket: Arc<UdpSocket>,
    local_id: PeerId,
    switch: NetworkSwitch,
    inbound: mpsc::Sender<Envelope>,
    recv_buffer: usize,
    token: CancellationToken,
) {
    let mut buf = vec![0u8; recv_buffer];
    tracing::debug!("Broadcast receiver started");
    loop {
        let (len, from) = tokio::select! {
            _ = token.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!("Broadcast receive error: {}", e);
                    continue;
                }
            },
        };

        if !switch.is_enabled() {
            continue;
        }

        match admit(local_id, &buf[..len]) {
            Ok(Some(envelope)) => {
                tracing::trace!("Received {:?} from {}", envelope.kind(), from);
                if inbound.send(envelope).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Dropping datagram from {}: {}", from, e),
        }
    }
    tracing::debug!("Broadcast receiver stopped");
}
