//! Peer transport capability.
//!
//! The protocol core never opens connections itself. A [`Transport`] sends
//! frames to peers, and everything coming back (received frames and peer
//! state changes) is pushed as [`TransportEvent`] values into an
//! unbounded channel owned by the node event loop.
//!
//! # Backends
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                 Node                    │
//! │         (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │
//!          ┌─────────┴────────┐
//!          ▼                  ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │ MemoryTransport │ │  TcpTransport   │
//! │  (in-process)   │ │ (length-prefix) │
//! └─────────────────┘ └─────────────────┘
//! ```

mod memory;
mod tcp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::{frame_codec, frame_text, TcpTransport, DEFAULT_MAX_FRAME_BYTES};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Identity of a remote peer as known to the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap a transport-level peer name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Peer name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Transport-level peer connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    /// No link
    NotConnected,
    /// Link being established
    Connecting,
    /// Link up
    Connected,
}

/// Event delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer's connectivity changed
    PeerStateChanged {
        /// Peer
        peer: PeerId,
        /// New state
        state: PeerState,
    },
    /// A frame arrived from a peer
    Received {
        /// Sender
        peer: PeerId,
        /// Raw frame text
        frame: String,
    },
}

/// Sink for transport events
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving end of a transport event channel
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create a transport event channel
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Transport trait for pluggable peer backends.
///
/// Sends are non-blocking: implementations queue the frame and return.
pub trait Transport: Send + Sync {
    /// Send a frame to one peer
    fn send(&self, peer: &PeerId, frame: &str) -> Result<()>;

    /// Send a frame to every connected peer
    fn broadcast(&self, frame: &str) -> Result<()>;

    /// Currently connected peers
    fn peers(&self) -> Vec<PeerId>;

    /// Transport name for logging
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_display() {
        let id = PeerId::from("PeerA");
        assert_eq!(id.to_string(), "PeerA");
        assert_eq!(id.as_str(), "PeerA");
        assert_eq!(PeerId::from("PeerA".to_string()), id);
    }
}
