//! Node event loop.
//!
//! A node is one tokio task that owns a [`Dispatcher`]. It multiplexes
//! three inputs with `tokio::select!`:
//!
//! - transport events (received frames, peer connectivity)
//! - application requests sent through a [`NodeHandle`]
//! - periodic ticks (pending-request sweep, app heartbeat)
//!
//! Every [`Outbound`] the dispatcher produces is handed to the transport;
//! delayed ones are scheduled with `tokio::time::sleep`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::catalog::MessageType;
use crate::codec::Command;
use crate::config::Config;
use crate::dispatch::{Dispatcher, Handlers, Outbound, Target};
use crate::error::{Result, TDDebugError};
use crate::protocol::{messages, KvpUpdate, Payload, SessionStats};
use crate::transport::{EventReceiver, PeerId, Transport, TransportEvent};

#[derive(Debug, Clone, Copy)]
enum LocalAction {
    RequestConnection,
    RequestExclusive,
    Grant,
    Refuse,
    Close,
    DropClient,
}

enum Request {
    Handshake {
        peer: PeerId,
        action: LocalAction,
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        peer: PeerId,
        command: Command,
        reply: oneshot::Sender<Result<()>>,
    },
    Broadcast {
        command: Command,
        reply: oneshot::Sender<Result<()>>,
    },
    SendCorrelated {
        peer: PeerId,
        command: Command,
        expected: MessageType,
        reply: oneshot::Sender<Result<Uuid>>,
    },
    Sessions {
        reply: oneshot::Sender<Vec<SessionStats>>,
    },
    PendingCount {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Running protocol node
pub struct Node<H: Handlers> {
    dispatcher: Dispatcher<H>,
    transport: Arc<dyn Transport>,
    events: EventReceiver,
    requests: mpsc::UnboundedReceiver<Request>,
    config: Config,
}

impl<H: Handlers + 'static> Node<H> {
    /// Start a node on the current tokio runtime.
    ///
    /// `events` must be the receiving end of the channel `transport`
    /// reports into.
    pub fn spawn(
        config: Config,
        transport: Arc<dyn Transport>,
        events: EventReceiver,
        handlers: H,
    ) -> NodeHandle {
        let (tx, requests) = mpsc::unbounded_channel();
        let node = Node {
            dispatcher: Dispatcher::new(&config, handlers),
            transport,
            events,
            requests,
            config,
        };
        tracing::info!(
            name = %node.dispatcher.name(),
            transport = node.transport.name(),
            "node started"
        );
        tokio::spawn(node.run());
        NodeHandle { tx }
    }

    async fn run(mut self) {
        let mut sweep = interval(self.config.correlator.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = self.config.heartbeat.app_interval().map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                // Transport events first, so a peer's Connected is seen
                // before any request that names it
                biased;

                Some(event) = self.events.recv() => self.on_transport_event(event),
                request = self.requests.recv() => match request {
                    Some(Request::Shutdown { reply }) => {
                        let _ = reply.send(());
                        break;
                    },
                    Some(request) => self.on_request(request),
                    None => break,
                },
                _ = sweep.tick() => {
                    let expired = self.dispatcher.expire_pending();
                    if expired > 0 {
                        tracing::debug!(expired, "pending sweep");
                    }
                },
                () = tick(&mut heartbeat) => {
                    let out = self.dispatcher.app_heartbeat();
                    self.execute(out);
                },
            }
        }

        tracing::info!(name = %self.dispatcher.name(), "node stopped");
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerStateChanged { peer, state } => {
                self.dispatcher.on_peer_state(&peer, state);
            },
            TransportEvent::Received { peer, frame } => {
                let out = self.dispatcher.handle_frame(&peer, &frame);
                self.execute(out);
            },
        }
    }

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Handshake {
                peer,
                action,
                reply,
            } => {
                let outbound = match action {
                    LocalAction::RequestConnection => self.dispatcher.request_connection(&peer),
                    LocalAction::RequestExclusive => {
                        self.dispatcher.request_exclusive_connection(&peer)
                    },
                    LocalAction::Grant => self.dispatcher.grant(&peer),
                    LocalAction::Refuse => self.dispatcher.refuse(&peer),
                    LocalAction::Close => self.dispatcher.close(&peer),
                    LocalAction::DropClient => self.dispatcher.drop_client(&peer),
                };
                let _ = reply.send(outbound.and_then(|o| self.deliver_now(&o)));
            },
            Request::Send {
                peer,
                command,
                reply,
            } => {
                let result = self
                    .dispatcher
                    .send(&peer, &command)
                    .and_then(|o| self.deliver_now(&o));
                let _ = reply.send(result);
            },
            Request::Broadcast { command, reply } => {
                let result = self
                    .dispatcher
                    .broadcast(&command)
                    .and_then(|o| self.deliver_now(&o));
                let _ = reply.send(result);
            },
            Request::SendCorrelated {
                peer,
                command,
                expected,
                reply,
            } => {
                let result = self
                    .dispatcher
                    .send_correlated(&peer, &command, expected)
                    .and_then(|(id, o)| self.deliver_now(&o).map(|()| id));
                let _ = reply.send(result);
            },
            Request::Sessions { reply } => {
                let _ = reply.send(self.dispatcher.sessions().map(|s| s.stats()).collect());
            },
            Request::PendingCount { reply } => {
                let _ = reply.send(self.dispatcher.correlator().pending_count());
            },
            Request::Shutdown { reply } => {
                let _ = reply.send(());
            },
        }
    }

    fn execute(&self, out: Vec<Outbound>) {
        for outbound in out {
            if outbound.delay.is_zero() {
                if let Err(e) = self.deliver_now(&outbound) {
                    tracing::warn!(to = ?outbound.target, error = %e, "send failed");
                }
            } else {
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    tokio::time::sleep(outbound.delay).await;
                    if let Err(e) = deliver(transport.as_ref(), &outbound) {
                        tracing::warn!(to = ?outbound.target, error = %e, "delayed send failed");
                    }
                });
            }
        }
    }

    fn deliver_now(&self, outbound: &Outbound) -> Result<()> {
        deliver(self.transport.as_ref(), outbound)
    }
}

fn deliver(transport: &dyn Transport, outbound: &Outbound) -> Result<()> {
    match &outbound.target {
        Target::Peer(peer) => transport.send(peer, &outbound.frame),
        Target::Broadcast => transport.broadcast(&outbound.frame),
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        },
        None => std::future::pending().await,
    }
}

/// Cloneable front door to a running [`Node`]
#[derive(Clone)]
pub struct NodeHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl NodeHandle {
    /// Ask `peer` to act as our debugger
    pub async fn request_connection(&self, peer: &PeerId) -> Result<()> {
        self.handshake(peer, LocalAction::RequestConnection).await
    }

    /// Ask `peer` to act as our debugger and take no other debuggee
    pub async fn request_exclusive_connection(&self, peer: &PeerId) -> Result<()> {
        self.handshake(peer, LocalAction::RequestExclusive).await
    }

    /// Grant a parked request (manual policy)
    pub async fn grant(&self, peer: &PeerId) -> Result<()> {
        self.handshake(peer, LocalAction::Grant).await
    }

    /// Refuse a parked request (manual policy)
    pub async fn refuse(&self, peer: &PeerId) -> Result<()> {
        self.handshake(peer, LocalAction::Refuse).await
    }

    /// End the session with `peer`
    pub async fn close(&self, peer: &PeerId) -> Result<()> {
        self.handshake(peer, LocalAction::Close).await
    }

    /// Drop `peer` as our debuggee
    pub async fn drop_client(&self, peer: &PeerId) -> Result<()> {
        self.handshake(peer, LocalAction::DropClient).await
    }

    /// Send a command to one peer
    pub async fn send(&self, peer: &PeerId, command: Command) -> Result<()> {
        self.call(|reply| Request::Send {
            peer: peer.clone(),
            command,
            reply,
        })
        .await?
    }

    /// Send a text message
    pub async fn send_text(&self, peer: &PeerId, text: &str) -> Result<()> {
        self.send(peer, messages::text_message(text)).await
    }

    /// Send a log line
    pub async fn send_log(&self, peer: &PeerId, line: &str) -> Result<()> {
        self.send(peer, messages::log_message(line)).await
    }

    /// Send a key-value update
    pub async fn send_kvp(&self, peer: &PeerId, update: &KvpUpdate) -> Result<()> {
        self.send(peer, update.to_command()).await
    }

    /// Send a command to every connected peer
    pub async fn broadcast(&self, command: Command) -> Result<()> {
        self.call(|reply| Request::Broadcast { command, reply })
            .await?
    }

    /// Send a command wrapped with a fresh correlation ID; returns the ID
    pub async fn send_correlated(
        &self,
        peer: &PeerId,
        command: Command,
        expected: MessageType,
    ) -> Result<Uuid> {
        self.call(|reply| Request::SendCorrelated {
            peer: peer.clone(),
            command,
            expected,
            reply,
        })
        .await?
    }

    /// Statistics for every session
    pub async fn sessions(&self) -> Result<Vec<SessionStats>> {
        self.call(|reply| Request::Sessions { reply }).await
    }

    /// Number of unanswered correlated requests
    pub async fn pending_count(&self) -> Result<usize> {
        self.call(|reply| Request::PendingCount { reply }).await
    }

    /// Stop the node and wait for it to exit
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| Request::Shutdown { reply }).await
    }

    async fn handshake(&self, peer: &PeerId, action: LocalAction) -> Result<()> {
        self.call(|reply| Request::Handshake {
            peer: peer.clone(),
            action,
            reply,
        })
        .await?
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| TDDebugError::NodeStopped)?;
        rx.await.map_err(|_| TDDebugError::NodeStopped)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dispatch::{Event, RecordingHandlers};
    use crate::protocol::{AcceptPolicy, HandshakeState};
    use crate::transport::{event_channel, MemoryNetwork, PeerState};

    fn config(name: &str, policy: AcceptPolicy) -> Config {
        let mut config = Config::default();
        config.node.name = name.to_string();
        config.node.accept_policy = policy;
        config.heartbeat.app_interval_secs = 0;
        config
    }

    fn start(net: &MemoryNetwork, name: &str, policy: AcceptPolicy) -> (NodeHandle, RecordingHandlers) {
        let (tx, rx) = event_channel();
        let transport = Arc::new(net.endpoint(name, tx));
        let events = RecordingHandlers::new();
        let handle = Node::spawn(config(name, policy), transport, rx, events.clone());
        (handle, events)
    }

    async fn wait_for(events: &RecordingHandlers, pred: impl Fn(&[Event]) -> bool) -> bool {
        for _ in 0..200 {
            if pred(events.events().as_slice()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_handshake_over_memory_network() {
        let net = MemoryNetwork::new();
        let (a, a_events) = start(&net, "PeerA", AcceptPolicy::Refuse);
        let (_b, b_events) = start(&net, "PeerB", AcceptPolicy::Grant);
        let (pa, pb) = (PeerId::from("PeerA"), PeerId::from("PeerB"));

        net.connect(&pa, &pb).unwrap();
        assert!(wait_for(&a_events, |e| e.contains(&Event::PeerState(pb.clone(), PeerState::Connected))).await);

        a.request_connection(&pb).await.unwrap();
        assert!(
            wait_for(&a_events, |e| e.contains(&Event::SessionState(
                pb.clone(),
                HandshakeState::RequestSent,
                HandshakeState::GrantedAsDebuggee
            )))
            .await
        );
        assert!(wait_for(&b_events, |e| e.iter().any(|e| matches!(e, Event::Version(p, _) if p == &pa))).await);

        a.send_log(&pb, "started").await.unwrap();
        assert!(wait_for(&b_events, |e| e.contains(&Event::Log(pa.clone(), "started".into()))).await);

        let sessions = a.sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, HandshakeState::GrantedAsDebuggee);
    }

    #[tokio::test]
    async fn test_local_errors_are_returned() {
        let net = MemoryNetwork::new();
        let (a, _) = start(&net, "PeerA", AcceptPolicy::Refuse);
        let err = a.request_connection(&PeerId::from("Ghost")).await.unwrap_err();
        assert!(matches!(err, TDDebugError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn test_disconnect_abandons_pending() {
        let net = MemoryNetwork::new();
        let (a, a_events) = start(&net, "PeerA", AcceptPolicy::Refuse);
        let (_b, _) = start(&net, "PeerB", AcceptPolicy::Refuse);
        let (pa, pb) = (PeerId::from("PeerA"), PeerId::from("PeerB"));
        net.connect(&pa, &pb).unwrap();
        assert!(wait_for(&a_events, |e| e.contains(&Event::PeerState(pb.clone(), PeerState::Connected))).await);

        let id = a
            .send_correlated(&pb, Command::new(MessageType::PeerTypeRequest), MessageType::PeerTypeResponse)
            .await
            .unwrap();
        // PeerB's reply carries the same ID, so the request resolves
        assert!(wait_for(&a_events, |e| e.iter().any(|e| matches!(e, Event::PeerType(..)))).await);
        assert_eq!(a.pending_count().await.unwrap(), 0);

        let id2 = a
            .send_correlated(&pb, Command::new(MessageType::KvpClear), MessageType::Unknown)
            .await
            .unwrap();
        assert_ne!(id, id2);
        net.disconnect(&pa, &pb);
        assert!(wait_for(&a_events, |e| e.contains(&Event::Abandoned(id2))).await);
        assert_eq!(a.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drop_client_ends_session_on_both_sides() {
        let net = MemoryNetwork::new();
        let (a, a_events) = start(&net, "PeerA", AcceptPolicy::Refuse);
        let (b, b_events) = start(&net, "PeerB", AcceptPolicy::Grant);
        let (pa, pb) = (PeerId::from("PeerA"), PeerId::from("PeerB"));
        net.connect(&pa, &pb).unwrap();
        assert!(wait_for(&a_events, |e| e.contains(&Event::PeerState(pb.clone(), PeerState::Connected))).await);

        a.request_connection(&pb).await.unwrap();
        assert!(
            wait_for(&b_events, |e| e.contains(&Event::SessionState(
                pa.clone(),
                HandshakeState::Idle,
                HandshakeState::GrantedAsDebugger
            )))
            .await
        );

        // KvpClear is never answered, so the request stays pending
        let id = a
            .send_correlated(&pb, Command::new(MessageType::KvpClear), MessageType::Unknown)
            .await
            .unwrap();
        assert!(wait_for(&b_events, |e| e.contains(&Event::KvpClear(pa.clone()))).await);
        assert_eq!(a.pending_count().await.unwrap(), 1);

        b.drop_client(&pa).await.unwrap();
        assert!(
            wait_for(&a_events, |e| e.contains(&Event::SessionState(
                pb.clone(),
                HandshakeState::GrantedAsDebuggee,
                HandshakeState::Disconnected
            )))
            .await
        );
        assert!(a_events.events().contains(&Event::Abandoned(id)));
        assert_eq!(a.pending_count().await.unwrap(), 0);
        assert!(b.drop_client(&pa).await.is_err());
    }

    #[tokio::test]
    async fn test_exclusive_request_over_memory_network() {
        let net = MemoryNetwork::new();
        let (a, a_events) = start(&net, "PeerA", AcceptPolicy::Refuse);
        let (_b, _) = start(&net, "PeerB", AcceptPolicy::Grant);
        let (c, c_events) = start(&net, "PeerC", AcceptPolicy::Refuse);
        let (pa, pb, pc) = (PeerId::from("PeerA"), PeerId::from("PeerB"), PeerId::from("PeerC"));
        net.connect(&pa, &pb).unwrap();
        net.connect(&pc, &pb).unwrap();
        assert!(wait_for(&c_events, |e| e.contains(&Event::PeerState(pb.clone(), PeerState::Connected))).await);

        a.request_exclusive_connection(&pb).await.unwrap();
        assert!(
            wait_for(&a_events, |e| e.contains(&Event::SessionState(
                pb.clone(),
                HandshakeState::RequestSent,
                HandshakeState::GrantedAsDebuggee
            )))
            .await
        );

        c.request_connection(&pb).await.unwrap();
        assert!(
            wait_for(&c_events, |e| e.contains(&Event::SessionState(
                pb.clone(),
                HandshakeState::RequestSent,
                HandshakeState::Idle
            )))
            .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_abandons_expired_requests() {
        let net = MemoryNetwork::new();
        let (tx, rx) = event_channel();
        let transport = Arc::new(net.endpoint("PeerA", tx));
        let mut cfg = config("PeerA", AcceptPolicy::Refuse);
        cfg.correlator.pending_ttl_secs = 1;
        cfg.correlator.sweep_interval_secs = 1;
        let a_events = RecordingHandlers::new();
        let a = Node::spawn(cfg, transport, rx, a_events.clone());
        let (_b, _) = start(&net, "PeerB", AcceptPolicy::Refuse);
        let (pa, pb) = (PeerId::from("PeerA"), PeerId::from("PeerB"));
        net.connect(&pa, &pb).unwrap();
        assert!(wait_for(&a_events, |e| e.contains(&Event::PeerState(pb.clone(), PeerState::Connected))).await);

        // PeerB never granted us, so it drops the report and never replies
        let id = a
            .send_correlated(&pb, Command::new(MessageType::KvpClear), MessageType::Unknown)
            .await
            .unwrap();
        assert_eq!(a.pending_count().await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(wait_for(&a_events, |e| e.contains(&Event::Abandoned(id))).await);
        assert_eq!(a.pending_count().await.unwrap(), 0);
        assert_eq!(
            a.sessions().await.unwrap()[0].state,
            HandshakeState::Idle
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_node() {
        let net = MemoryNetwork::new();
        let (a, _) = start(&net, "PeerA", AcceptPolicy::Refuse);
        a.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            a.sessions().await,
            Err(TDDebugError::NodeStopped)
        ));
    }
}
