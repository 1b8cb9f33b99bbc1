//! Asynchronous request/response correlation.
//!
//! An outgoing command that expects a reply is wrapped in an
//! `IdEncapsulatedCommand` carrying a fresh correlation ID, and the ID is
//! remembered in the pending set. When an encapsulated frame comes back:
//!
//! - ID is pending: it is a reply; the entry is removed and the inner
//!   frame is handed back for normal dispatch.
//! - ID is not pending: the peer is asking us something; the inner frame
//!   is dispatched as a request and the ID is echoed on our reply.
//!
//! Matching is by ID only. Replies may arrive in any order.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::catalog::MessageType;
use crate::codec::{Command, WireCodec};
use crate::error::Result;
use crate::transport::PeerId;

/// Default age after which an unanswered request is abandoned
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(120);

/// One outstanding correlated request
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Correlation ID
    pub id: Uuid,
    /// Peer the request went to
    pub peer: PeerId,
    /// Reply type the caller expects (diagnostic only)
    pub expected: MessageType,
    /// Monotonic creation time, used for expiry
    pub created_at: Instant,
    /// Wall-clock send time, for display
    pub sent_at: DateTime<Utc>,
}

impl PendingRequest {
    /// Time since the request was sent
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// How an incoming encapsulated frame should be handled
#[derive(Debug)]
pub enum Routing<'a> {
    /// Reply to one of our requests
    Reply {
        /// The request this answers (already removed from the pending set)
        request: PendingRequest,
        /// Inner frame
        inner: &'a str,
    },
    /// Unsolicited request; reply must carry `id`
    Request {
        /// Correlation ID to echo
        id: Uuid,
        /// Inner frame
        inner: &'a str,
    },
}

/// Correlation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    /// Requests registered
    pub sent: u64,
    /// Replies matched
    pub resolved: u64,
    /// Requests evicted by age or peer loss
    pub abandoned: u64,
    /// Encapsulated frames whose ID was not pending
    pub unsolicited: u64,
}

/// Pending-request set plus the wrapping logic
#[derive(Debug)]
pub struct Correlator {
    codec: WireCodec,
    pending: HashMap<Uuid, PendingRequest>,
    ttl: Duration,
    stats: CorrelatorStats,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(WireCodec::new())
    }
}

impl Correlator {
    /// Create with a codec and the default TTL
    pub fn new(codec: WireCodec) -> Self {
        Self {
            codec,
            pending: HashMap::new(),
            ttl: DEFAULT_PENDING_TTL,
            stats: CorrelatorStats::default(),
        }
    }

    /// Set the expiry age
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Expiry age
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Wrap a pre-encoded frame with a fresh correlation ID and remember it.
    ///
    /// Returns the ID and the wrapper frame to hand to the transport.
    pub fn send_with_correlation(
        &mut self,
        peer: &PeerId,
        payload: &str,
        expected: MessageType,
    ) -> Result<(Uuid, String)> {
        let id = self.fresh_id();
        let wrapper = self.wrap(id, payload)?;

        self.pending.insert(
            id,
            PendingRequest {
                id,
                peer: peer.clone(),
                expected,
                created_at: Instant::now(),
                sent_at: Utc::now(),
            },
        );
        self.stats.sent += 1;
        tracing::debug!(id = %id, peer = %peer, expected = %expected, "correlated request sent");

        Ok((id, wrapper))
    }

    /// Wrap a pre-encoded frame under an existing ID (used for replies)
    pub fn wrap(&self, id: Uuid, payload: &str) -> Result<String> {
        self.codec.encode(
            &Command::new(MessageType::IdEncapsulatedCommand)
                .param("ID", id.to_string())
                .param("Command", payload),
        )
    }

    /// Classify an incoming encapsulated frame.
    ///
    /// Returns `Ok(None)` when `wrapper` is not an `IdEncapsulatedCommand`,
    /// and `Err` when its ID or inner frame is missing or malformed.
    pub fn route<'a>(&mut self, wrapper: &'a Command) -> Result<Option<Routing<'a>>> {
        let Some((id, inner)) = self.codec.unwrap_encapsulated(wrapper)? else {
            return Ok(None);
        };

        match self.pending.remove(&id) {
            Some(request) => {
                self.stats.resolved += 1;
                tracing::debug!(
                    id = %id,
                    expected = %request.expected,
                    elapsed_ms = request.age().as_millis() as u64,
                    "correlated reply matched"
                );
                Ok(Some(Routing::Reply { request, inner }))
            },
            None => {
                self.stats.unsolicited += 1;
                Ok(Some(Routing::Request { id, inner }))
            },
        }
    }

    /// Remove and return a pending entry by ID
    pub fn resolve(&mut self, id: &Uuid) -> Option<PendingRequest> {
        let request = self.pending.remove(id);
        if request.is_some() {
            self.stats.resolved += 1;
        }
        request
    }

    /// Whether `id` is pending
    pub fn is_pending(&self, id: &Uuid) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot of pending requests
    pub fn pending(&self) -> impl Iterator<Item = &PendingRequest> {
        self.pending.values()
    }

    /// Evict requests older than the TTL
    pub fn expire(&mut self) -> Vec<PendingRequest> {
        let ttl = self.ttl;
        self.evict(|r| r.age() > ttl, "expired")
    }

    /// Abandon every request sent to `peer`
    pub fn drop_peer(&mut self, peer: &PeerId) -> Vec<PendingRequest> {
        self.evict(|r| &r.peer == peer, "peer lost")
    }

    /// Statistics
    pub fn stats(&self) -> CorrelatorStats {
        self.stats
    }

    fn evict(&mut self, pred: impl Fn(&PendingRequest) -> bool, reason: &str) -> Vec<PendingRequest> {
        let ids: Vec<Uuid> = self
            .pending
            .values()
            .filter(|r| pred(r))
            .map(|r| r.id)
            .collect();

        let evicted: Vec<PendingRequest> = ids
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect();

        for r in &evicted {
            tracing::warn!(
                id = %r.id,
                peer = %r.peer,
                expected = %r.expected,
                sent_at = %r.sent_at,
                reason,
                "abandoning correlated request"
            );
        }
        self.stats.abandoned += evicted.len() as u64;
        evicted
    }

    fn fresh_id(&self) -> Uuid {
        loop {
            let id = Uuid::new_v4();
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, id: &Uuid, by: Duration) {
        if let Some(r) = self.pending.get_mut(id) {
            if let Some(earlier) = r.created_at.checked_sub(by) {
                r.created_at = earlier;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerId {
        PeerId::from("PeerB")
    }

    fn inner_frame() -> String {
        WireCodec::new()
            .encode(&Command::new(MessageType::ClientCommandRequest).param("Name", "dump"))
            .unwrap()
    }

    #[test]
    fn test_reply_matches_and_clears() {
        let mut c = Correlator::default();
        let (id, wrapper) = c
            .send_with_correlation(&peer(), &inner_frame(), MessageType::ClientCommandResponse)
            .unwrap();
        assert!(c.is_pending(&id));

        let decoded = WireCodec::new().decode(&wrapper);
        match c.route(&decoded).unwrap() {
            Some(Routing::Reply { request, inner }) => {
                assert_eq!(request.id, id);
                assert_eq!(request.expected, MessageType::ClientCommandResponse);
                assert_eq!(inner, inner_frame());
            },
            other => panic!("expected reply, got {other:?}"),
        }
        assert_eq!(c.pending_count(), 0);
    }

    #[test]
    fn test_second_delivery_is_not_a_reply() {
        let mut c = Correlator::default();
        let (_, wrapper) = c
            .send_with_correlation(&peer(), &inner_frame(), MessageType::ClientCommandResponse)
            .unwrap();
        let decoded = WireCodec::new().decode(&wrapper);

        assert!(matches!(c.route(&decoded).unwrap(), Some(Routing::Reply { .. })));
        assert!(matches!(c.route(&decoded).unwrap(), Some(Routing::Request { .. })));
        assert_eq!(c.stats().resolved, 1);
        assert_eq!(c.stats().unsolicited, 1);
    }

    #[test]
    fn test_unknown_id_is_request() {
        let mut c = Correlator::default();
        let id = Uuid::new_v4();
        let wrapper = WireCodec::new().decode(&c.wrap(id, &inner_frame()).unwrap());
        match c.route(&wrapper).unwrap() {
            Some(Routing::Request { id: got, .. }) => assert_eq!(got, id),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_non_encapsulated_is_none() {
        let mut c = Correlator::default();
        let cmd = Command::new(MessageType::TextMessage).param("Message", "hi");
        assert!(c.route(&cmd).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let mut c = Correlator::default();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..100 {
            let (id, _) = c
                .send_with_correlation(&peer(), &inner_frame(), MessageType::Unknown)
                .unwrap();
            assert!(ids.insert(id));
        }
        assert_eq!(c.pending_count(), 100);
    }

    #[test]
    fn test_expire_evicts_old_entries() {
        let mut c = Correlator::default().with_ttl(Duration::from_millis(500));
        let (old, _) = c
            .send_with_correlation(&peer(), &inner_frame(), MessageType::EchoReturn)
            .unwrap();
        let (fresh, _) = c
            .send_with_correlation(&peer(), &inner_frame(), MessageType::EchoReturn)
            .unwrap();
        c.backdate(&old, Duration::from_secs(1));

        let evicted = c.expire();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, old);
        assert!(c.is_pending(&fresh));
        assert_eq!(c.stats().abandoned, 1);
    }

    #[test]
    fn test_drop_peer() {
        let mut c = Correlator::default();
        c.send_with_correlation(&peer(), &inner_frame(), MessageType::Unknown)
            .unwrap();
        c.send_with_correlation(&PeerId::from("Other"), &inner_frame(), MessageType::Unknown)
            .unwrap();
        assert_eq!(c.drop_peer(&peer()).len(), 1);
        assert_eq!(c.pending_count(), 1);
    }
}
