//! Point-to-point object transfer
//!
//! A peer missing an object opens a TCP listener, broadcasts an
//! `ObjectRequest` naming the origin, and waits for the origin to connect back
//! and push one length-prefixed frame. One connection per object; the
//! listener is dropped as soon as the frame is in.

use crate::broadcast::BusHandle;
use crate::config::SyncConfig;
use crate::error::TransferError;
use crate::frame::{encode_header, FrameDecoder, Progress};
use crate::identity::LocalIdentity;
use crate::object_store::{ObjectKey, ObjectStore};
use bytes::Bytes;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use whiteboard_wire::{Control, ControlRecord, PeerAddr};

const READ_CHUNK: usize = 16 * 1024;

/// Fetches objects this peer does not hold
pub struct ObjectTransfer {
    identity: LocalIdentity,
    bus: BusHandle,
    objects: ObjectStore,
    port: u16,
    timeout: Duration,
    max_object_bytes: usize,
    token: CancellationToken,
    /// One fetch at a time: the listener port is fixed
    in_flight: Mutex<()>,
}

impl ObjectTransfer {
    pub fn new(
        identity: LocalIdentity,
        bus: BusHandle,
        objects: ObjectStore,
        config: &SyncConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            identity,
            bus,
            objects,
            port: config.object_port,
            timeout: config.object_timeout(),
            max_object_bytes: config.max_object_bytes,
            token,
            in_flight: Mutex::new(()),
        }
    }

    /// Local hit, or fetch from the origin
    pub async fn resolve(&self, key: ObjectKey) -> Result<Bytes, TransferError> {
        match self.objects.get(&key) {
            Some(blob) => Ok(blob),
            None => self.fetch(key).await,
        }
    }

    /// Fetch `key` from its origin and store it
    ///
    /// Waits until the blob arrives, the stream fails, the timeout elapses or
    /// the session shuts down.
    pub async fn fetch(&self, key: ObjectKey) -> Result<Bytes, TransferError> {
        let _guard = self.in_flight.lock().await;

        // Another fetch may have brought it in while we waited
        if let Some(blob) = self.objects.get(&key) {
            return Ok(blob);
        }
        if key.origin == self.identity.id() {
            return Err(TransferError::Unavailable(key));
        }

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.port))
            .await
            .map_err(|source| TransferError::Bind {
                port: self.port,
                source,
            })?;
        let port = listener.local_addr()?.port();
        let reply_to = self.identity.addr(port);

        tracing::debug!("Requesting object {} on port {}", key, port);
        self.bus.send(ControlRecord::new(
            self.identity.id(),
            Control::ObjectRequest {
                target: key.origin,
                key: key.key,
                reply_to,
            },
        ));

        let blob = tokio::select! {
            _ = self.token.cancelled() => return Err(TransferError::Cancelled),
            received = tokio::time::timeout(
                self.timeout,
                receive_object(listener, self.max_object_bytes),
            ) => received.map_err(|_| TransferError::Timeout(self.timeout))??,
        };

        tracing::info!("Received object {} ({} bytes)", key, blob.len());
        self.objects.insert(key, blob.clone());
        Ok(blob)
    }
}

/// Accept exactly one connection and read one frame from it
async fn receive_object(listener: TcpListener, max_len: usize) -> Result<Bytes, TransferError> {
    let (mut stream, peer) = listener.accept().await?;
    drop(listener);
    tracing::debug!("Object stream from {}", peer);

    let mut decoder = FrameDecoder::new(max_len);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            decoder.finish()?;
            // finish() only succeeds after Complete, which returns below
            return Err(TransferError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        if let Progress::Complete(blob) = decoder.feed(&chunk[..n])? {
            return Ok(blob);
        }
    }
}

/// Responder side: connect to `reply_to` and push `blob` as one frame
pub async fn push_object(blob: Bytes, reply_to: PeerAddr) -> Result<(), TransferError> {
    let header = encode_header(blob.len())?;
    let mut stream = TcpStream::connect(reply_to.socket_addr()).await?;
    stream.write_all(&header).await?;
    stream.write_all(&blob).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    tracing::debug!("Pushed {} byte object to {}", blob.len(), reply_to);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::outbound_channel;
    use std::sync::Arc;
    use whiteboard_wire::{Envelope, PeerId};

    fn config(timeout_ms: u64) -> SyncConfig {
        SyncConfig {
            object_port: 0,
            object_timeout_ms: timeout_ms,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_from_origin() {
        let (bus, mut outbound) = outbound_channel();
        let objects = ObjectStore::new();
        let identity = LocalIdentity::new(PeerId(1), Ipv4Addr::LOCALHOST);
        let transfer = Arc::new(ObjectTransfer::new(
            identity,
            bus,
            objects.clone(),
            &config(5_000),
            CancellationToken::new(),
        ));

        let origin = PeerId(0xabc);
        let key = ObjectKey::new(origin, 7);
        let fetch = tokio::spawn({
            let transfer = transfer.clone();
            async move { transfer.fetch(key).await }
        });

        let request = outbound.recv().await.unwrap();
        let Envelope::Control(ControlRecord {
            origin: requester,
            control:
                Control::ObjectRequest {
                    target,
                    key: requested,
                    reply_to,
                },
        }) = request
        else {
            panic!("expected an object request, got {:?}", request);
        };
        assert_eq!(requester, PeerId(1));
        assert_eq!(target, origin);
        assert_eq!(requested, 7);

        let blob = Bytes::from_static(b"twelve bytes");
        assert_eq!(blob.len(), 12);
        push_object(blob.clone(), reply_to).await.unwrap();

        let fetched = fetch.await.unwrap().unwrap();
        assert_eq!(fetched, blob);
        assert_eq!(objects.get(&key), Some(blob));
    }

    #[tokio::test]
    async fn test_store_hit_skips_network() {
        let (bus, mut outbound) = outbound_channel();
        let objects = ObjectStore::new();
        let key = ObjectKey::new(PeerId(2), 1);
        objects.insert(key, Bytes::from_static(b"cached"));
        let transfer = ObjectTransfer::new(
            LocalIdentity::new(PeerId(1), Ipv4Addr::LOCALHOST),
            bus,
            objects,
            &config(5_000),
            CancellationToken::new(),
        );

        assert_eq!(transfer.resolve(key).await.unwrap(), Bytes::from_static(b"cached"));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_own_missing_object_is_unavailable() {
        let (bus, _outbound) = outbound_channel();
        let transfer = ObjectTransfer::new(
            LocalIdentity::new(PeerId(1), Ipv4Addr::LOCALHOST),
            bus,
            ObjectStore::new(),
            &config(5_000),
            CancellationToken::new(),
        );

        let result = transfer.resolve(ObjectKey::new(PeerId(1), 3)).await;
        assert!(matches!(result, Err(TransferError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_fetch_times_out_without_responder() {
        let (bus, _outbound) = outbound_channel();
        let transfer = ObjectTransfer::new(
            LocalIdentity::new(PeerId(1), Ipv4Addr::LOCALHOST),
            bus,
            ObjectStore::new(),
            &config(100),
            CancellationToken::new(),
        );

        let result = transfer.fetch(ObjectKey::new(PeerId(9), 1)).await;
        assert!(matches!(result, Err(TransferError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_truncated_stream_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let receiver = tokio::spawn(receive_object(listener, 1024));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[0, 0, 0, 10, 1, 2, 3]).await.unwrap();
        stream.shutdown().await.unwrap();

        let result = receiver.await.unwrap();
        assert!(matches!(result, Err(TransferError::Frame(_))));
    }
}
