//! In-process transport.
//!
//! A [`MemoryNetwork`] is a hub of named endpoints. Links are explicit:
//! [`MemoryNetwork::connect`] reports `Connected` to both ends and
//! [`MemoryNetwork::disconnect`] reports `NotConnected`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use super::{EventSender, PeerId, PeerState, Transport, TransportEvent};
use crate::error::{Result, TDDebugError};

#[derive(Default)]
struct Hub {
    endpoints: HashMap<PeerId, EventSender>,
    links: BTreeSet<(PeerId, PeerId)>,
}

impl Hub {
    fn link_key(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    fn linked(&self, a: &PeerId, b: &PeerId) -> bool {
        self.links.contains(&Self::link_key(a, b))
    }

    fn notify(&self, to: &PeerId, event: TransportEvent) {
        if let Some(tx) = self.endpoints.get(to) {
            if tx.send(event).is_err() {
                tracing::debug!(peer = %to, "memory endpoint receiver dropped");
            }
        }
    }
}

/// Shared in-process network
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    /// Empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named endpoint whose events go to `events`
    pub fn endpoint(&self, name: impl Into<PeerId>, events: EventSender) -> MemoryTransport {
        let me = name.into();
        self.lock().endpoints.insert(me.clone(), events);
        MemoryTransport {
            me,
            network: self.clone(),
        }
    }

    /// Link two endpoints
    pub fn connect(&self, a: &PeerId, b: &PeerId) -> Result<()> {
        let mut hub = self.lock();
        for id in [a, b] {
            if !hub.endpoints.contains_key(id) {
                return Err(TDDebugError::UnknownPeer(id.to_string()));
            }
        }
        if !hub.links.insert(Hub::link_key(a, b)) {
            return Ok(());
        }
        hub.notify(
            a,
            TransportEvent::PeerStateChanged {
                peer: b.clone(),
                state: PeerState::Connected,
            },
        );
        hub.notify(
            b,
            TransportEvent::PeerStateChanged {
                peer: a.clone(),
                state: PeerState::Connected,
            },
        );
        Ok(())
    }

    /// Unlink two endpoints
    pub fn disconnect(&self, a: &PeerId, b: &PeerId) {
        let mut hub = self.lock();
        if !hub.links.remove(&Hub::link_key(a, b)) {
            return;
        }
        hub.notify(
            a,
            TransportEvent::PeerStateChanged {
                peer: b.clone(),
                state: PeerState::NotConnected,
            },
        );
        hub.notify(
            b,
            TransportEvent::PeerStateChanged {
                peer: a.clone(),
                state: PeerState::NotConnected,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One endpoint on a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    me: PeerId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// This endpoint's name
    pub fn id(&self) -> &PeerId {
        &self.me
    }
}

impl Transport for MemoryTransport {
    fn send(&self, peer: &PeerId, frame: &str) -> Result<()> {
        let hub = self.network.lock();
        if !hub.linked(&self.me, peer) {
            return Err(TDDebugError::UnknownPeer(peer.to_string()));
        }
        hub.notify(
            peer,
            TransportEvent::Received {
                peer: self.me.clone(),
                frame: frame.to_string(),
            },
        );
        Ok(())
    }

    fn broadcast(&self, frame: &str) -> Result<()> {
        for peer in self.peers() {
            self.send(&peer, frame)?;
        }
        Ok(())
    }

    fn peers(&self) -> Vec<PeerId> {
        let hub = self.network.lock();
        hub.links
            .iter()
            .filter_map(|(a, b)| {
                if a == &self.me {
                    Some(b.clone())
                } else if b == &self.me {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
