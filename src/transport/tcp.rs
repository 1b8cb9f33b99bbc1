//! TCP transport.
//!
//! Each frame travels as a 4-byte big-endian length followed by that many
//! bytes of UTF-8 text. Peers are identified by their remote socket
//! address. Every connection gets one reader task feeding the event
//! channel and one writer task draining a per-peer queue.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use super::{EventSender, PeerId, PeerState, Transport, TransportEvent};
use crate::error::{Result, TDDebugError};

/// Default maximum frame size (1 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Length-delimited codec for TDDebug frames: 4-byte big-endian length,
/// then the payload, bounded by `max_frame_bytes` in both directions
pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

/// Interpret a received frame body as UTF-8 text
pub fn frame_text(body: &[u8]) -> Result<String> {
    std::str::from_utf8(body)
        .map(str::to_string)
        .map_err(|e| TDDebugError::Decode(format!("frame is not UTF-8: {e}")))
}

struct TcpInner {
    writers: Mutex<HashMap<PeerId, mpsc::UnboundedSender<String>>>,
    events: EventSender,
    max_frame_bytes: usize,
}

impl TcpInner {
    fn writers(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, mpsc::UnboundedSender<String>>> {
        self.writers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("transport event receiver dropped");
        }
    }
}

/// TCP transport
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<TcpInner>,
}

impl TcpTransport {
    /// Create a transport delivering events to `events`
    pub fn new(events: EventSender) -> Self {
        Self::with_max_frame(events, DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create with a custom frame size limit
    pub fn with_max_frame(events: EventSender, max_frame_bytes: usize) -> Self {
        Self {
            inner: Arc::new(TcpInner {
                writers: Mutex::new(HashMap::new()),
                events,
                max_frame_bytes,
            }),
        }
    }

    /// Bind a listener and accept peers in the background.
    ///
    /// Returns the bound address (useful when binding port 0).
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            TDDebugError::Transport(format!("Failed to bind TCP to {addr}: {e}"))
        })?;
        let local = listener.local_addr()?;
        tracing::info!("TCP transport listening on {}", local);

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        tracing::debug!("New TCP connection from {}", remote);
                        this.attach(stream, remote);
                    },
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                    },
                }
            }
        });

        Ok(local)
    }

    /// Dial a peer
    pub async fn connect(&self, addr: SocketAddr) -> Result<PeerId> {
        let peer = PeerId::new(addr.to_string());
        self.inner.emit(TransportEvent::PeerStateChanged {
            peer: peer.clone(),
            state: PeerState::Connecting,
        });

        match TcpStream::connect(addr).await {
            Ok(stream) => {
                self.attach(stream, addr);
                Ok(peer)
            },
            Err(e) => {
                self.inner.emit(TransportEvent::PeerStateChanged {
                    peer,
                    state: PeerState::NotConnected,
                });
                Err(TDDebugError::Transport(format!(
                    "Failed to connect to {addr}: {e}"
                )))
            },
        }
    }

    fn attach(&self, stream: TcpStream, remote: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed for {}: {}", remote, e);
        }
        let peer = PeerId::new(remote.to_string());
        let (read_half, write_half) = stream.into_split();
        let max = self.inner.max_frame_bytes;
        let mut reader = FramedRead::new(read_half, frame_codec(max));
        let mut writer = FramedWrite::new(write_half, frame_codec(max));
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        self.inner.writers().insert(peer.clone(), tx);
        self.inner.emit(TransportEvent::PeerStateChanged {
            peer: peer.clone(),
            state: PeerState::Connected,
        });

        let writer_peer = peer.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = writer.send(Bytes::from(frame)).await {
                    tracing::warn!(peer = %writer_peer, "write failed: {}", e);
                    break;
                }
            }
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(next) = reader.next().await {
                match next {
                    Ok(body) => match frame_text(&body) {
                        Ok(frame) => inner.emit(TransportEvent::Received {
                            peer: peer.clone(),
                            frame,
                        }),
                        // The length prefix keeps the stream in sync, so only this frame is lost
                        Err(e) => tracing::warn!(peer = %peer, "dropping frame: {}", e),
                    },
                    Err(e) => {
                        tracing::warn!(peer = %peer, "connection error: {}", e);
                        break;
                    },
                }
            }
            tracing::debug!(peer = %peer, "connection closed");
            inner.writers().remove(&peer);
            inner.emit(TransportEvent::PeerStateChanged {
                peer,
                state: PeerState::NotConnected,
            });
        });
    }

    fn check_size(&self, frame: &str) -> Result<()> {
        let max = self.inner.max_frame_bytes;
        if frame.len() > max {
            return Err(TDDebugError::FrameTooLarge {
                size: frame.len(),
                max,
            });
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn send(&self, peer: &PeerId, frame: &str) -> Result<()> {
        self.check_size(frame)?;
        let writers = self.inner.writers();
        let tx = writers
            .get(peer)
            .ok_or_else(|| TDDebugError::UnknownPeer(peer.to_string()))?;
        tx.send(frame.to_string())
            .map_err(|_| TDDebugError::Transport(format!("writer for {peer} has stopped")))
    }

    fn broadcast(&self, frame: &str) -> Result<()> {
        self.check_size(frame)?;
        let writers = self.inner.writers();
        for (peer, tx) in writers.iter() {
            if tx.send(frame.to_string()).is_err() {
                tracing::warn!(peer = %peer, "broadcast skipped stopped writer");
            }
        }
        Ok(())
    }

    fn peers(&self) -> Vec<PeerId> {
        self.inner.writers().keys().cloned().collect()
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip_over_duplex() {
        let (a, b) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(a, frame_codec(1024));
        let mut reader = FramedRead::new(b, frame_codec(1024));
        writer.send(Bytes::from(",hello")).await.unwrap();
        let body = reader.next().await.unwrap().unwrap();
        assert_eq!(frame_text(&body).unwrap(), ",hello");
    }

    #[tokio::test]
    async fn test_wire_layout_is_big_endian_prefix() {
        let mock = tokio_test::io::Builder::new()
            .write(&[0, 0, 0, 3, b',', b'h', b'i'])
            .build();
        let mut writer = FramedWrite::new(mock, frame_codec(1024));
        writer.send(Bytes::from(",hi")).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_then_eof() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0, 0, 0, 2])
            .read(b",x")
            .build();
        let mut reader = FramedRead::new(mock, frame_codec(1024));
        let body = reader.next().await.unwrap().unwrap();
        assert_eq!(frame_text(&body).unwrap(), ",x");
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_prefix_rejected_on_read() {
        let mock = tokio_test::io::Builder::new().read(&[0, 1, 0, 0]).build();
        let mut reader = FramedRead::new(mock, frame_codec(1024));
        let err = reader.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        assert!(matches!(
            frame_text(&[0xff, 0xfe]),
            Err(TDDebugError::Decode(_))
        ));
        assert_eq!(frame_text("§".as_bytes()).unwrap(), "§");
    }

    #[test]
    fn test_send_to_unknown_peer() {
        let (tx, _rx) = crate::transport::event_channel();
        let transport = TcpTransport::new(tx);
        assert!(matches!(
            transport.send(&PeerId::from("127.0.0.1:1"), ",x"),
            Err(TDDebugError::UnknownPeer(_))
        ));
        assert_eq!(transport.name(), "TCP");
    }

    #[test]
    fn test_oversized_send_rejected_locally() {
        let (tx, _rx) = crate::transport::event_channel();
        let transport = TcpTransport::with_max_frame(tx, 4);
        assert!(matches!(
            transport.send(&PeerId::from("127.0.0.1:1"), "0123456789"),
            Err(TDDebugError::FrameTooLarge { size: 10, max: 4 })
        ));
        assert!(matches!(
            transport.broadcast("0123456789"),
            Err(TDDebugError::FrameTooLarge { size: 10, max: 4 })
        ));
    }
}
