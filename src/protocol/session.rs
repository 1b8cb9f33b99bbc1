//! Per-peer session state.
//!
//! A [`PeerSession`] is created when the transport reports a peer as
//! connected and destroyed when it reports the peer gone. It owns the
//! link's [`Handshake`] plus what we have learned about the peer.

use std::time::{Duration, Instant};

use super::handshake::{AcceptPolicy, Handshake, HandshakeState};
use super::messages::{PeerType, VersionInfo};
use crate::transport::PeerId;

/// State for one remote peer
#[derive(Debug, Clone)]
pub struct PeerSession {
    peer: PeerId,
    handshake: Handshake,
    display_name: Option<String>,
    peer_type: Option<PeerType>,
    remote_version: Option<VersionInfo>,
    exclusive: bool,
    connected_at: Instant,
    last_heard: Instant,
    frames_received: u64,
    frames_sent: u64,
}

impl PeerSession {
    /// New session in `Idle`
    pub fn new(peer: PeerId, policy: AcceptPolicy) -> Self {
        let now = Instant::now();
        Self {
            peer,
            handshake: Handshake::new(policy),
            display_name: None,
            peer_type: None,
            remote_version: None,
            exclusive: false,
            connected_at: now,
            last_heard: now,
            frames_received: 0,
            frames_sent: 0,
        }
    }

    /// Transport identity
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Handshake state machine
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Mutable handshake state machine
    pub fn handshake_mut(&mut self) -> &mut Handshake {
        &mut self.handshake
    }

    /// Current handshake state
    pub fn state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// Name the peer announced, falling back to the transport id
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.peer.as_str())
    }

    /// Record the peer's announced name
    pub fn set_display_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !name.is_empty() {
            self.display_name = Some(name);
        }
    }

    /// Role the peer announced
    pub fn peer_type(&self) -> Option<PeerType> {
        self.peer_type
    }

    /// Record the peer's role
    pub fn set_peer_type(&mut self, peer_type: PeerType) {
        self.peer_type = Some(peer_type);
    }

    /// Version info the peer pushed
    pub fn remote_version(&self) -> Option<&VersionInfo> {
        self.remote_version.as_ref()
    }

    /// Record the peer's version info
    pub fn set_remote_version(&mut self, version: VersionInfo) {
        self.remote_version = Some(version);
    }

    /// Whether the peer asked to be our only debuggee
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Record whether the peer's connection request was exclusive
    pub fn set_exclusive(&mut self, exclusive: bool) {
        self.exclusive = exclusive;
    }

    /// Count an inbound frame
    pub fn record_received(&mut self) {
        self.frames_received += 1;
        self.last_heard = Instant::now();
    }

    /// Count an outbound frame
    pub fn record_sent(&mut self) {
        self.frames_sent += 1;
    }

    /// Time since the last inbound frame
    pub fn idle_for(&self) -> Duration {
        self.last_heard.elapsed()
    }

    /// Session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            peer: self.peer.clone(),
            state: self.state(),
            frames_received: self.frames_received,
            frames_sent: self.frames_sent,
            uptime_secs: self.connected_at.elapsed().as_secs(),
        }
    }
}

/// Session statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Peer
    pub peer: PeerId,
    /// Current handshake state
    pub state: HandshakeState,
    /// Frames received
    pub frames_received: u64,
    /// Frames sent
    pub frames_sent: u64,
    /// Seconds since the transport connected
    pub uptime_secs: u64,
}
