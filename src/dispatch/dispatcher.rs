//! Inbound frame routing and outbound frame production.
//!
//! The dispatcher is synchronous: feeding it a frame or a local action
//! returns the [`Outbound`] frames to send, and the node event loop hands
//! those to the transport. This keeps the whole protocol testable without
//! a runtime.

use std::collections::HashMap;
use std::time::Duration;

use uuid::Uuid;

use super::handlers::{Context, Correlation, Handlers};
use crate::catalog::{make_symbolic, HandshakeCommand, MessageType, SpecialCommand};
use crate::codec::{Command, DecodedFrame, WireCodec};
use crate::config::Config;
use crate::error::{Result, TDDebugError};
use crate::protocol::messages;
use crate::protocol::{
    AcceptPolicy, ClientCommandList, ClientCommandRequest, ClientCommandResult, Correlator,
    DebuggerStateChange, EchoRequest, Handshake, HandshakeMessage, HandshakeState, Heartbeat,
    IdiotLightControl, KvpRemove, KvpUpdate, Payload, PeerSession, PeerType, PeerTypeInfo,
    PendingRequest, Routing, VersionInfo,
};
use crate::transport::{PeerId, PeerState};

/// Deepest allowed nesting of encapsulated or broadcast commands
const MAX_NESTING: usize = 8;

/// Where an outbound frame goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// One peer
    Peer(PeerId),
    /// Every connected peer
    Broadcast,
}

/// A frame the transport should send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Recipient
    pub target: Target,
    /// Encoded frame
    pub frame: String,
    /// Wait this long before sending
    pub delay: Duration,
}

impl Outbound {
    /// Immediate frame for one peer
    pub fn to(peer: PeerId, frame: String) -> Self {
        Self {
            target: Target::Peer(peer),
            frame,
            delay: Duration::ZERO,
        }
    }

    /// Immediate frame for every peer
    pub fn broadcast(frame: String) -> Self {
        Self {
            target: Target::Broadcast,
            frame,
            delay: Duration::ZERO,
        }
    }

    /// Delay sending
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Protocol core for one node: sessions, correlation and routing
pub struct Dispatcher<H: Handlers> {
    name: String,
    policy: AcceptPolicy,
    enforce_roles: bool,
    codec: WireCodec,
    correlator: Correlator,
    sessions: HashMap<PeerId, PeerSession>,
    handlers: H,
    heartbeat_seq: u64,
}

impl<H: Handlers> Dispatcher<H> {
    /// Create from configuration
    pub fn new(config: &Config, handlers: H) -> Self {
        let codec = WireCodec::with_delimiters(config.codec.delimiter_set());
        let correlator = Correlator::new(codec.clone()).with_ttl(config.correlator.pending_ttl());
        Self {
            name: config.node.name.clone(),
            policy: config.node.accept_policy,
            enforce_roles: config.node.enforce_roles,
            codec,
            correlator,
            sessions: HashMap::new(),
            handlers,
            heartbeat_seq: 0,
        }
    }

    /// Our display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Application handlers
    pub fn handlers(&self) -> &H {
        &self.handlers
    }

    /// Mutable application handlers
    pub fn handlers_mut(&mut self) -> &mut H {
        &mut self.handlers
    }

    /// Session for a peer
    pub fn session(&self, peer: &PeerId) -> Option<&PeerSession> {
        self.sessions.get(peer)
    }

    /// All sessions
    pub fn sessions(&self) -> impl Iterator<Item = &PeerSession> {
        self.sessions.values()
    }

    /// Handshake state with a peer
    pub fn state(&self, peer: &PeerId) -> Option<HandshakeState> {
        self.sessions.get(peer).map(PeerSession::state)
    }

    /// Pending-request tracker
    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Frame codec
    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    /// Apply a transport connectivity change.
    ///
    /// `Connected` creates a fresh session (replacing a finished one);
    /// `NotConnected` destroys it and abandons its pending requests.
    pub fn on_peer_state(&mut self, peer: &PeerId, state: PeerState) {
        self.handlers.on_peer_state_changed(peer, state);
        match state {
            PeerState::Connecting => {},
            PeerState::Connected => {
                let fresh = self
                    .sessions
                    .get(peer)
                    .map_or(true, |s| s.state() == HandshakeState::Disconnected);
                if fresh {
                    tracing::debug!(peer = %peer, "session created");
                    self.sessions
                        .insert(peer.clone(), PeerSession::new(peer.clone(), self.policy));
                }
            },
            PeerState::NotConnected => {
                if let Some(mut session) = self.sessions.remove(peer) {
                    let from = session.state();
                    session.handshake_mut().peer_lost();
                    if from != HandshakeState::Disconnected {
                        self.handlers
                            .on_session_state_changed(peer, from, HandshakeState::Disconnected);
                    }
                    tracing::debug!(peer = %peer, "session destroyed");
                }
                let abandoned = self.correlator.drop_peer(peer);
                self.abandon(abandoned);
            },
        }
    }

    /// Handle one frame received from `peer`
    pub fn handle_frame(&mut self, peer: &PeerId, raw: &str) -> Vec<Outbound> {
        tracing::trace!(peer = %peer, frame = %make_symbolic(raw), "frame received");
        self.session_entry(peer).record_received();

        let frame = self.codec.decode_frame(raw);
        let mut out = Vec::new();
        self.dispatch(peer, frame, Correlation::None, 0, &mut out);
        out
    }

    /// Ask `peer` to act as our debugger
    pub fn request_connection(&mut self, peer: &PeerId) -> Result<Outbound> {
        self.local_handshake(peer, Handshake::request_connection, false)
    }

    /// Ask `peer` to act as our debugger and to take no other debuggee
    /// while we hold the session
    pub fn request_exclusive_connection(&mut self, peer: &PeerId) -> Result<Outbound> {
        self.local_handshake(peer, Handshake::request_connection, true)
    }

    /// Grant a request parked by the manual policy
    pub fn grant(&mut self, peer: &PeerId) -> Result<Outbound> {
        let wants_exclusive = self.sessions.get(peer).map_or(false, PeerSession::is_exclusive);
        if let Some(holder) = self.exclusive_holder(peer, wants_exclusive) {
            return Err(TDDebugError::Protocol(format!(
                "Cannot grant {peer}: exclusive session held with {holder}"
            )));
        }
        self.local_handshake(peer, Handshake::grant, false)
    }

    /// Refuse a request parked by the manual policy
    pub fn refuse(&mut self, peer: &PeerId) -> Result<Outbound> {
        self.local_handshake(peer, Handshake::refuse, false)
    }

    /// End the session with `peer`
    pub fn close(&mut self, peer: &PeerId) -> Result<Outbound> {
        self.local_handshake(peer, Handshake::close, false)
    }

    /// Drop `peer` as our debuggee
    pub fn drop_client(&mut self, peer: &PeerId) -> Result<Outbound> {
        self.local_handshake(peer, Handshake::drop_client, false)
    }

    /// Encode a command for one peer
    pub fn send(&mut self, peer: &PeerId, command: &Command) -> Result<Outbound> {
        self.known(peer)?;
        let frame = self.codec.encode(command)?;
        self.record_sent(peer);
        Ok(Outbound::to(peer.clone(), frame))
    }

    /// Encode a command for every peer
    pub fn broadcast(&mut self, command: &Command) -> Result<Outbound> {
        let frame = self.codec.encode(command)?;
        for session in self.sessions.values_mut() {
            session.record_sent();
        }
        Ok(Outbound::broadcast(frame))
    }

    /// Send a command wrapped with a fresh correlation ID.
    ///
    /// The reply reaches the handlers with [`Correlation::Reply`] carrying
    /// the returned ID.
    pub fn send_correlated(
        &mut self,
        peer: &PeerId,
        command: &Command,
        expected: MessageType,
    ) -> Result<(Uuid, Outbound)> {
        self.known(peer)?;
        let inner = self.codec.encode(command)?;
        let (id, frame) = self.correlator.send_with_correlation(peer, &inner, expected)?;
        self.record_sent(peer);
        Ok((id, Outbound::to(peer.clone(), frame)))
    }

    /// App heartbeat for every peer with an established role
    pub fn app_heartbeat(&mut self) -> Vec<Outbound> {
        self.heartbeat_seq += 1;
        let heartbeat = Heartbeat {
            kind: MessageType::AppHeartbeat,
            sequence: self.heartbeat_seq,
        };
        let frame = match self.codec.encode(&heartbeat.to_command()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("failed to encode heartbeat: {}", e);
                return Vec::new();
            },
        };

        let mut out = Vec::new();
        for session in self.sessions.values_mut() {
            let hs = session.handshake();
            if hs.is_debugger() || hs.is_debuggee() {
                session.record_sent();
                out.push(Outbound::to(session.peer().clone(), frame.clone()));
            }
        }
        out
    }

    /// Abandon correlated requests older than the TTL; returns how many
    pub fn expire_pending(&mut self) -> usize {
        let expired = self.correlator.expire();
        let count = expired.len();
        self.abandon(expired);
        count
    }

    fn dispatch(
        &mut self,
        peer: &PeerId,
        frame: DecodedFrame,
        correlation: Correlation,
        depth: usize,
        out: &mut Vec<Outbound>,
    ) {
        let ty = frame.command.message_type;
        if depth > MAX_NESTING {
            tracing::warn!(peer = %peer, message_type = %ty, depth, "command nested too deeply, dropping");
            return;
        }
        if !self.admitted(peer, ty) {
            tracing::warn!(
                peer = %peer,
                message_type = %ty,
                state = ?self.state(peer),
                "message not allowed for the negotiated role, dropping"
            );
            return;
        }

        let ctx = self.context(peer, correlation);
        if let Err(e) = self.route(&ctx, &frame, depth, out) {
            tracing::warn!(peer = %peer, message_type = %ty, error = %e, "dropping message");
        }
    }

    fn route(
        &mut self,
        ctx: &Context,
        frame: &DecodedFrame,
        depth: usize,
        out: &mut Vec<Outbound>,
    ) -> Result<()> {
        let command = &frame.command;
        match command.message_type {
            MessageType::HandShake => self.on_handshake(ctx, command, out)?,
            MessageType::IdEncapsulatedCommand => self.on_encapsulated(ctx, command, depth, out)?,
            MessageType::BroadcastCommand => {
                let inner = command.params.require("Command")?;
                let inner = self.codec.decode_frame(inner);
                self.dispatch(&ctx.peer, inner, ctx.correlation.clone(), depth + 1, out);
            },

            MessageType::TextMessage => {
                self.handlers
                    .on_text_message(ctx, &messages::message_text(command));
            },
            MessageType::TextBlock => {
                self.handlers.on_text_block(ctx, &messages::message_text(command));
            },
            MessageType::LogMessage => {
                self.handlers
                    .on_log_message(ctx, &messages::message_text(command));
            },
            MessageType::ControlIdiotLight => {
                let control = IdiotLightControl::from_command(command)?;
                self.handlers.on_idiot_light(ctx, &control);
            },
            MessageType::KvpData => {
                let update = KvpUpdate::from_command(command)?;
                self.handlers.on_kvp_upsert(ctx, &update);
            },
            MessageType::KvpRemove => {
                let remove = KvpRemove::from_command(command)?;
                self.handlers.on_kvp_remove(ctx, remove.id);
            },
            MessageType::KvpClear => self.handlers.on_kvp_clear(ctx),
            MessageType::SpecialCommand => match messages::parse_special(command) {
                SpecialCommand::Unknown => {
                    tracing::warn!(peer = %ctx.peer, "unknown special command");
                    self.handlers.on_unknown(ctx, frame);
                },
                special => self.handlers.on_special_command(ctx, special),
            },

            MessageType::EchoMessage => self.on_echo(ctx, command, out)?,
            MessageType::EchoReturn => {
                self.handlers
                    .on_echo_return(ctx, &messages::message_text(command));
            },

            MessageType::AppHeartbeat | MessageType::ConnectionHeartbeat => {
                let heartbeat = Heartbeat::from_command(command)?;
                self.handlers.on_heartbeat(ctx, &heartbeat);
            },
            MessageType::RequestConnectionHeartbeat => {
                self.heartbeat_seq += 1;
                let reply = Heartbeat {
                    kind: MessageType::ConnectionHeartbeat,
                    sequence: self.heartbeat_seq,
                };
                self.reply(ctx, &reply.to_command(), out)?;
            },

            MessageType::ClientCommandRequest => {
                let request = ClientCommandRequest::from_command(command)?;
                let result = self.handlers.execute_client_command(ctx, &request);
                self.reply(ctx, &result.to_command(), out)?;
            },
            MessageType::ClientCommandResponse => {
                let result = ClientCommandResult::from_command(command)?;
                self.handlers.on_client_command_result(ctx, &result);
            },
            MessageType::ClientCommandListRequest => {
                let list = ClientCommandList {
                    commands: self.handlers.client_commands(),
                };
                self.reply(ctx, &list.to_command(), out)?;
            },
            MessageType::ClientCommandList => {
                let list = ClientCommandList::from_command(command)?;
                self.handlers.on_client_command_list(ctx, &list);
            },

            MessageType::VersionInfo => {
                let info = VersionInfo::from_command(command)?;
                if !info.is_compatible() {
                    tracing::warn!(
                        peer = %ctx.peer,
                        theirs = %info.protocol,
                        ours = crate::PROTOCOL_VERSION,
                        "peer speaks a different protocol version"
                    );
                }
                if let Some(session) = self.sessions.get_mut(&ctx.peer) {
                    session.set_remote_version(info.clone());
                }
                self.handlers.on_version_info(ctx, &info);
            },
            MessageType::PeerTypeRequest => {
                let info = PeerTypeInfo {
                    peer_type: self.role_for(&ctx.peer),
                    name: self.name.clone(),
                };
                self.reply(ctx, &info.to_command(), out)?;
            },
            MessageType::PeerTypeResponse => {
                let info = PeerTypeInfo::from_command(command)?;
                if let Some(session) = self.sessions.get_mut(&ctx.peer) {
                    session.set_peer_type(info.peer_type);
                    session.set_display_name(info.name.as_str());
                }
                self.handlers.on_peer_type(ctx, &info);
            },
            MessageType::BroadcastMessage => {
                self.handlers
                    .on_broadcast_message(ctx, &messages::message_text(command));
            },
            MessageType::DebuggerStateChanged => {
                let change = DebuggerStateChange::from_command(command)?;
                self.handlers.on_debugger_state_changed(ctx, &change);
            },

            MessageType::Unknown => {
                tracing::warn!(
                    peer = %ctx.peer,
                    token = %frame.token,
                    payload = %frame.payload,
                    "unknown message type"
                );
                self.handlers.on_unknown(ctx, frame);
            },
        }
        Ok(())
    }

    fn on_handshake(&mut self, ctx: &Context, command: &Command, out: &mut Vec<Outbound>) -> Result<()> {
        let message = HandshakeMessage::from_command(command)?;

        let session = self.session_entry(&ctx.peer);
        if let Some(name) = &message.peer_name {
            session.set_display_name(name.as_str());
        }
        let fresh_request = message.command == HandshakeCommand::RequestConnection
            && session.state() == HandshakeState::Idle;

        if fresh_request {
            if let Some(holder) = self.exclusive_holder(&ctx.peer, message.request_exclusive) {
                tracing::info!(
                    peer = %ctx.peer,
                    holder = %holder,
                    exclusive = message.request_exclusive,
                    "refusing connection while an exclusive session is held"
                );
                let reply = self
                    .handshake_message(HandshakeCommand::ConnectionRefused)
                    .to_command();
                return self.reply(ctx, &reply, out);
            }
        }

        let session = self.session_entry(&ctx.peer);
        if fresh_request {
            session.set_exclusive(message.request_exclusive);
        }
        let transition = session.handshake_mut().transition_to(message.command);

        if transition.changed() {
            self.handlers
                .on_session_state_changed(&ctx.peer, transition.from, transition.to);
        }

        if let Some(reply) = transition.reply {
            let reply = self.handshake_message(reply).to_command();
            self.reply(ctx, &reply, out)?;
        }

        if transition.applied
            && transition.from == HandshakeState::RequestSent
            && transition.to == HandshakeState::GrantedAsDebuggee
        {
            let version = VersionInfo::current(self.name.clone()).to_command();
            self.push(&ctx.peer, &version, Duration::ZERO, None, out)?;
            let heartbeat = Command::new(MessageType::RequestConnectionHeartbeat);
            self.push(&ctx.peer, &heartbeat, Duration::ZERO, None, out)?;
        }

        if transition.changed() && transition.to == HandshakeState::Disconnected {
            let abandoned = self.correlator.drop_peer(&ctx.peer);
            self.abandon(abandoned);
        }
        Ok(())
    }

    fn on_encapsulated(
        &mut self,
        ctx: &Context,
        command: &Command,
        depth: usize,
        out: &mut Vec<Outbound>,
    ) -> Result<()> {
        let (correlation, inner) = match self.correlator.route(command)? {
            Some(Routing::Reply { request, inner }) => {
                if request.peer != ctx.peer {
                    tracing::debug!(
                        id = %request.id,
                        sent_to = %request.peer,
                        answered_by = %ctx.peer,
                        "reply came from a different peer"
                    );
                }
                (Correlation::Reply(request), inner.to_string())
            },
            Some(Routing::Request { id, inner }) => (Correlation::Request(id), inner.to_string()),
            None => return Ok(()),
        };

        let inner = self.codec.decode_frame(&inner);
        self.dispatch(&ctx.peer, inner, correlation, depth + 1, out);
        Ok(())
    }

    fn on_echo(&mut self, ctx: &Context, command: &Command, out: &mut Vec<Outbound>) -> Result<()> {
        let echo = EchoRequest::from_command(command)?;

        let target = match echo.echo_back_to.as_deref() {
            Some(name) => self.find_peer(name).unwrap_or_else(|| {
                tracing::debug!(echo_back_to = name, "echo target unknown, replying to sender");
                ctx.peer.clone()
            }),
            None => ctx.peer.clone(),
        };

        let reply = messages::echo_return(&echo.reversed());
        let delay = Duration::from_secs(echo.delay_secs);
        self.push(&target, &reply, delay, request_id(ctx), out)
    }

    fn reply(&mut self, ctx: &Context, command: &Command, out: &mut Vec<Outbound>) -> Result<()> {
        self.push(&ctx.peer, command, Duration::ZERO, request_id(ctx), out)
    }

    fn push(
        &mut self,
        peer: &PeerId,
        command: &Command,
        delay: Duration,
        wrap: Option<Uuid>,
        out: &mut Vec<Outbound>,
    ) -> Result<()> {
        let mut frame = self.codec.encode(command)?;
        if let Some(id) = wrap {
            frame = self.correlator.wrap(id, &frame)?;
        }
        self.record_sent(peer);
        out.push(Outbound::to(peer.clone(), frame).delayed(delay));
        Ok(())
    }

    fn local_handshake(
        &mut self,
        peer: &PeerId,
        action: impl FnOnce(&mut Handshake) -> Result<HandshakeCommand>,
        exclusive: bool,
    ) -> Result<Outbound> {
        let session = self
            .sessions
            .get_mut(peer)
            .ok_or_else(|| TDDebugError::UnknownPeer(peer.to_string()))?;
        let from = session.state();
        let sub = action(session.handshake_mut())?;
        let to = session.state();

        if from != to {
            self.handlers.on_session_state_changed(peer, from, to);
        }
        if to == HandshakeState::Disconnected {
            let abandoned = self.correlator.drop_peer(peer);
            self.abandon(abandoned);
        }

        let message = self.handshake_message(sub).exclusive(exclusive).to_command();
        let frame = self.codec.encode(&message)?;
        self.record_sent(peer);
        Ok(Outbound::to(peer.clone(), frame))
    }

    fn handshake_message(&self, command: HandshakeCommand) -> HandshakeMessage {
        HandshakeMessage::new(command).with_peer_name(self.name.clone())
    }

    /// Another debuggee whose session rules out granting `peer`: any
    /// granted debuggee when `peer` wants exclusivity, otherwise one that
    /// asked for it
    fn exclusive_holder(&self, peer: &PeerId, wants_exclusive: bool) -> Option<PeerId> {
        self.sessions
            .values()
            .find(|s| {
                s.peer() != peer
                    && s.state() == HandshakeState::GrantedAsDebugger
                    && (wants_exclusive || s.is_exclusive())
            })
            .map(|s| s.peer().clone())
    }

    fn admitted(&self, peer: &PeerId, ty: MessageType) -> bool {
        if !self.enforce_roles {
            return true;
        }
        let state = self.state(peer);
        if ty.is_state_report() {
            state == Some(HandshakeState::GrantedAsDebugger)
        } else if ty == MessageType::ClientCommandRequest {
            state == Some(HandshakeState::GrantedAsDebuggee)
        } else {
            true
        }
    }

    fn role_for(&self, peer: &PeerId) -> PeerType {
        match self.state(peer) {
            Some(HandshakeState::GrantedAsDebugger) => PeerType::Debugger,
            Some(HandshakeState::GrantedAsDebuggee) => PeerType::Debuggee,
            _ => PeerType::Peer,
        }
    }

    fn context(&self, peer: &PeerId, correlation: Correlation) -> Context {
        let peer_name = self
            .sessions
            .get(peer)
            .map_or(peer.as_str(), PeerSession::display_name)
            .to_string();
        Context {
            peer: peer.clone(),
            peer_name,
            correlation,
        }
    }

    fn find_peer(&self, name: &str) -> Option<PeerId> {
        self.sessions
            .keys()
            .find(|p| p.as_str() == name)
            .or_else(|| {
                self.sessions
                    .values()
                    .find(|s| s.display_name() == name)
                    .map(PeerSession::peer)
            })
            .cloned()
    }

    fn session_entry(&mut self, peer: &PeerId) -> &mut PeerSession {
        let policy = self.policy;
        self.sessions.entry(peer.clone()).or_insert_with(|| {
            tracing::debug!(peer = %peer, "frame from peer with no session, creating one");
            PeerSession::new(peer.clone(), policy)
        })
    }

    fn known(&self, peer: &PeerId) -> Result<()> {
        if self.sessions.contains_key(peer) {
            Ok(())
        } else {
            Err(TDDebugError::UnknownPeer(peer.to_string()))
        }
    }

    fn record_sent(&mut self, peer: &PeerId) {
        if let Some(session) = self.sessions.get_mut(peer) {
            session.record_sent();
        }
    }

    fn abandon(&mut self, requests: Vec<PendingRequest>) {
        for request in &requests {
            self.handlers.on_request_abandoned(request);
        }
    }
}

fn request_id(ctx: &Context) -> Option<Uuid> {
    match ctx.correlation {
        Correlation::Request(id) => Some(id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handlers::{Event, RecordingHandlers};
    use crate::catalog::IdiotLightCommand;
    use crate::protocol::messages::{
        broadcast_command, broadcast_message, log_message, special, text_block, text_message,
    };

    struct Peer {
        id: PeerId,
        dispatcher: Dispatcher<RecordingHandlers>,
        events: RecordingHandlers,
    }

    fn peer(name: &str, policy: AcceptPolicy, commands: &[&str]) -> Peer {
        let mut config = Config::default();
        config.node.name = name.to_string();
        config.node.accept_policy = policy;
        let events = RecordingHandlers::new().with_commands(commands);
        Peer {
            id: PeerId::from(name),
            dispatcher: Dispatcher::new(&config, events.clone()),
            events,
        }
    }

    fn link(a: &mut Peer, b: &mut Peer) {
        a.dispatcher.on_peer_state(&b.id, PeerState::Connected);
        b.dispatcher.on_peer_state(&a.id, PeerState::Connected);
        a.events.take();
        b.events.take();
    }

    /// Deliver frames addressed to `to`, returning what it sends back
    fn deliver(from: &PeerId, to: &mut Peer, frames: Vec<Outbound>) -> Vec<Outbound> {
        frames
            .into_iter()
            .filter(|o| o.target == Target::Peer(to.id.clone()) || o.target == Target::Broadcast)
            .flat_map(|o| to.dispatcher.handle_frame(from, &o.frame))
            .collect()
    }

    fn handshake(debuggee: &mut Peer, debugger: &mut Peer) {
        let request = debuggee.dispatcher.request_connection(&debugger.id).unwrap();
        let granted = deliver(&debuggee.id, debugger, vec![request]);
        let pushes = deliver(&debugger.id, debuggee, granted);
        let acks = deliver(&debuggee.id, debugger, pushes);
        deliver(&debugger.id, debuggee, acks);
    }

    fn pair() -> (Peer, Peer) {
        let mut a = peer("PeerA", AcceptPolicy::Refuse, &["dump"]);
        let mut b = peer("PeerB", AcceptPolicy::Grant, &[]);
        link(&mut a, &mut b);
        (a, b)
    }

    #[test]
    fn test_handshake_grant_flow() {
        let (mut a, mut b) = pair();

        let request = a.dispatcher.request_connection(&b.id).unwrap();
        assert_eq!(a.dispatcher.state(&b.id), Some(HandshakeState::RequestSent));

        let granted = deliver(&a.id, &mut b, vec![request]);
        assert_eq!(granted.len(), 1);
        assert_eq!(
            b.dispatcher.state(&a.id),
            Some(HandshakeState::GrantedAsDebugger)
        );

        let pushes = deliver(&b.id, &mut a, granted);
        assert_eq!(
            a.dispatcher.state(&b.id),
            Some(HandshakeState::GrantedAsDebuggee)
        );
        let types: Vec<_> = pushes
            .iter()
            .map(|o| b.dispatcher.codec().decode(&o.frame).message_type)
            .collect();
        assert_eq!(
            types,
            vec![MessageType::VersionInfo, MessageType::RequestConnectionHeartbeat]
        );

        let acks = deliver(&a.id, &mut b, pushes);
        assert!(b
            .events
            .events()
            .iter()
            .any(|e| matches!(e, Event::Version(p, v) if p == &a.id && v.program == "PeerA")));

        deliver(&b.id, &mut a, acks);
        assert!(a
            .events
            .events()
            .iter()
            .any(|e| matches!(e, Event::Heartbeat(_, h) if h.kind == MessageType::ConnectionHeartbeat)));
        assert_eq!(
            b.dispatcher.session(&a.id).unwrap().display_name(),
            "PeerA"
        );
    }

    #[test]
    fn test_refusing_peer() {
        let mut a = peer("PeerA", AcceptPolicy::Refuse, &[]);
        let mut c = peer("PeerC", AcceptPolicy::Refuse, &[]);
        link(&mut a, &mut c);

        let request = a.dispatcher.request_connection(&c.id).unwrap();
        let refused = deliver(&a.id, &mut c, vec![request]);
        deliver(&c.id, &mut a, refused);
        assert_eq!(a.dispatcher.state(&c.id), Some(HandshakeState::Idle));
        assert_eq!(c.dispatcher.state(&a.id), Some(HandshakeState::Idle));
    }

    #[test]
    fn test_state_reports_gated_until_granted() {
        let (mut a, mut b) = pair();

        let early = a.dispatcher.send(&b.id, &log_message("too early")).unwrap();
        deliver(&a.id, &mut b, vec![early]);
        assert!(b.events.take().iter().all(|e| !matches!(e, Event::Log(..))));

        handshake(&mut a, &mut b);
        let log = a.dispatcher.send(&b.id, &log_message("hello")).unwrap();
        deliver(&a.id, &mut b, vec![log]);
        assert!(b
            .events
            .events()
            .contains(&Event::Log(a.id.clone(), "hello".into())));
    }

    #[test]
    fn test_gating_can_be_disabled() {
        let mut config = Config::default();
        config.node.enforce_roles = false;
        let events = RecordingHandlers::new();
        let mut d = Dispatcher::new(&config, events.clone());
        let a = PeerId::from("PeerA");
        d.on_peer_state(&a, PeerState::Connected);

        let frame = WireCodec::new().encode(&text_message("hi")).unwrap();
        d.handle_frame(&a, &frame);
        assert!(events.events().contains(&Event::Text(a, "hi".into())));
    }

    #[test]
    fn test_client_command_only_reaches_debuggee() {
        let (mut a, mut b) = pair();
        let request = ClientCommandRequest {
            name: "dump".into(),
            args: vec!["x".into()],
        };

        // Before the handshake the debuggee ignores it
        let out = b.dispatcher.send(&a.id, &request.to_command()).unwrap();
        assert!(deliver(&b.id, &mut a, vec![out]).is_empty());

        handshake(&mut a, &mut b);
        let out = b.dispatcher.send(&a.id, &request.to_command()).unwrap();
        let response = deliver(&b.id, &mut a, vec![out]);
        deliver(&a.id, &mut b, response);

        assert!(b.events.events().contains(&Event::ClientCommandResult(
            a.id.clone(),
            None,
            ClientCommandResult {
                name: "dump".into(),
                success: true,
                result: "x".into(),
            }
        )));
    }

    #[test]
    fn test_correlated_request_reply() {
        let (mut a, mut b) = pair();
        handshake(&mut a, &mut b);

        let request = ClientCommandRequest {
            name: "dump".into(),
            args: vec!["1".into(), "2".into()],
        };
        let (id, out) = b
            .dispatcher
            .send_correlated(&a.id, &request.to_command(), MessageType::ClientCommandResponse)
            .unwrap();
        assert!(b.dispatcher.correlator().is_pending(&id));

        let reply = deliver(&b.id, &mut a, vec![out]);
        let wrapper = a.dispatcher.codec().decode(&reply[0].frame);
        assert_eq!(wrapper.message_type, MessageType::IdEncapsulatedCommand);
        assert_eq!(wrapper.params.get("ID"), Some(id.to_string().as_str()));

        deliver(&a.id, &mut b, reply);
        assert_eq!(b.dispatcher.correlator().pending_count(), 0);
        assert!(b.events.events().iter().any(|e| matches!(
            e,
            Event::ClientCommandResult(_, Some(got), r) if *got == id && r.result == "1 2"
        )));
    }

    #[test]
    fn test_echo_reversed_with_delay_and_target() {
        let mut a = peer("PeerA", AcceptPolicy::Refuse, &[]);
        let mut b = peer("PeerB", AcceptPolicy::Refuse, &[]);
        let mut c = peer("PeerC", AcceptPolicy::Refuse, &[]);
        link(&mut a, &mut b);
        link(&mut b, &mut c);

        let echo = EchoRequest {
            message: "hello".into(),
            delay_secs: 1,
            echo_back_to: Some("PeerC".into()),
        };
        let out = a.dispatcher.send(&b.id, &echo.to_command()).unwrap();
        let replies = deliver(&a.id, &mut b, vec![out]);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].target, Target::Peer(c.id.clone()));
        assert_eq!(replies[0].delay, Duration::from_secs(1));

        deliver(&b.id, &mut c, replies);
        assert!(c
            .events
            .events()
            .contains(&Event::EchoReturn(b.id.clone(), None, "olleh".into())));
    }

    #[test]
    fn test_echo_unknown_target_goes_to_sender() {
        let (mut a, mut b) = pair();
        let echo = EchoRequest {
            message: "abc".into(),
            delay_secs: 0,
            echo_back_to: Some("Nobody".into()),
        };
        let out = a.dispatcher.send(&b.id, &echo.to_command()).unwrap();
        let replies = deliver(&a.id, &mut b, vec![out]);
        assert_eq!(replies[0].target, Target::Peer(a.id.clone()));
    }

    #[test]
    fn test_broadcast_command_dispatches_inner() {
        let (mut a, mut b) = pair();
        handshake(&mut a, &mut b);

        let inner = WireCodec::new().encode(&text_message("to all")).unwrap();
        let out = a.dispatcher.broadcast(&broadcast_command(&inner)).unwrap();
        assert_eq!(out.target, Target::Broadcast);
        deliver(&a.id, &mut b, vec![out]);
        assert!(b
            .events
            .events()
            .contains(&Event::Text(a.id.clone(), "to all".into())));
    }

    #[test]
    fn test_unknown_token_reaches_catch_all() {
        let (a, mut b) = pair();
        let out = b
            .dispatcher
            .handle_frame(&a.id, ",00000000-0000-0000-0000-000000000000,X=1");
        assert!(out.is_empty());
        assert!(b.events.events().contains(&Event::Unknown(
            a.id.clone(),
            "00000000-0000-0000-0000-000000000000".into()
        )));
    }

    #[test]
    fn test_malformed_field_drops_only_that_message() {
        let (mut a, mut b) = pair();
        handshake(&mut a, &mut b);
        b.events.take();

        let bad = Command::new(MessageType::KvpData)
            .param("ID", "not-a-uuid")
            .param("Key", "k");
        let out = a.dispatcher.send(&b.id, &bad).unwrap();
        deliver(&a.id, &mut b, vec![out]);
        assert!(b.events.take().is_empty());

        let good = KvpUpdate::new(Uuid::new_v4(), "Program", "TDDebug");
        let out = a.dispatcher.send(&b.id, &good.to_command()).unwrap();
        deliver(&a.id, &mut b, vec![out]);
        assert_eq!(b.events.take(), vec![Event::KvpUpsert(a.id.clone(), good)]);
        assert_eq!(
            b.dispatcher.state(&a.id),
            Some(HandshakeState::GrantedAsDebugger)
        );
    }

    #[test]
    fn test_close_propagates_and_initiator_stays_quiet() {
        let (mut a, mut b) = pair();
        handshake(&mut a, &mut b);

        let close = a.dispatcher.close(&b.id).unwrap();
        let ack = deliver(&a.id, &mut b, vec![close]);
        assert_eq!(b.dispatcher.state(&a.id), Some(HandshakeState::Disconnected));
        assert_eq!(ack.len(), 1);

        assert!(deliver(&b.id, &mut a, ack).is_empty());
        assert_eq!(a.dispatcher.state(&b.id), Some(HandshakeState::Disconnected));
        assert!(a.dispatcher.close(&b.id).is_err());
    }

    #[test]
    fn test_peer_loss_abandons_pending() {
        let (mut a, mut b) = pair();
        handshake(&mut a, &mut b);

        let (id, _) = b
            .dispatcher
            .send_correlated(&a.id, &Command::new(MessageType::ClientCommandListRequest), MessageType::ClientCommandList)
            .unwrap();
        b.dispatcher.on_peer_state(&a.id, PeerState::NotConnected);

        assert!(b.dispatcher.session(&a.id).is_none());
        assert_eq!(b.dispatcher.correlator().pending_count(), 0);
        let events = b.events.events();
        assert!(events.contains(&Event::Abandoned(id)));
        assert!(events.contains(&Event::SessionState(
            a.id.clone(),
            HandshakeState::GrantedAsDebugger,
            HandshakeState::Disconnected
        )));
    }

    #[test]
    fn test_reconnect_creates_fresh_session() {
        let (mut a, mut b) = pair();
        let request = a.dispatcher.request_connection(&b.id).unwrap();
        deliver(&a.id, &mut b, vec![request]);
        b.dispatcher.close(&a.id).unwrap();
        assert_eq!(b.dispatcher.state(&a.id), Some(HandshakeState::Disconnected));

        b.dispatcher.on_peer_state(&a.id, PeerState::Connected);
        assert_eq!(b.dispatcher.state(&a.id), Some(HandshakeState::Idle));
    }

    #[test]
    fn test_local_action_on_unknown_peer() {
        let (mut a, _) = pair();
        assert!(matches!(
            a.dispatcher.request_connection(&PeerId::from("Ghost")),
            Err(TDDebugError::UnknownPeer(_))
        ));
        assert!(a
            .dispatcher
            .send(&PeerId::from("Ghost"), &text_message("x"))
            .is_err());
    }

    #[test]
    fn test_app_heartbeat_only_to_granted_peers() {
        let (mut a, mut b) = pair();
        assert!(a.dispatcher.app_heartbeat().is_empty());

        handshake(&mut a, &mut b);
        let out = a.dispatcher.app_heartbeat();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target, Target::Peer(b.id.clone()));
    }

    #[test]
    fn test_peer_type_reply_reflects_role() {
        let (mut a, mut b) = pair();
        handshake(&mut a, &mut b);

        let out = a
            .dispatcher
            .send(&b.id, &Command::new(MessageType::PeerTypeRequest))
            .unwrap();
        let reply = deliver(&a.id, &mut b, vec![out]);
        deliver(&b.id, &mut a, reply);
        assert!(a.events.events().contains(&Event::PeerType(
            b.id.clone(),
            PeerTypeInfo {
                peer_type: PeerType::Debugger,
                name: "PeerB".into(),
            }
        )));
    }

    /// One of each state report that has no dedicated test elsewhere
    fn state_reports(kvp: Uuid) -> Vec<Command> {
        vec![
            text_block("line one\nline two"),
            IdiotLightControl {
                light: "Link".into(),
                command: IdiotLightCommand::SetBgColor,
                value: Some("green".into()),
            }
            .to_command(),
            KvpRemove { id: kvp }.to_command(),
            Command::new(MessageType::KvpClear),
            special(SpecialCommand::ClearLog),
            ClientCommandList {
                commands: vec!["dump".into(), "stats".into()],
            }
            .to_command(),
        ]
    }

    fn send_all(from: &mut Peer, to: &mut Peer, commands: &[Command]) {
        let out: Vec<_> = commands
            .iter()
            .map(|c| from.dispatcher.send(&to.id, c).unwrap())
            .collect();
        deliver(&from.id, to, out);
    }

    #[test]
    fn test_state_reports_reach_their_handlers() {
        let (mut a, mut b) = pair();
        handshake(&mut a, &mut b);
        b.events.take();

        let kvp = Uuid::new_v4();
        send_all(&mut a, &mut b, &state_reports(kvp));
        assert_eq!(
            b.events.take(),
            vec![
                Event::TextBlock(a.id.clone(), "line one\nline two".into()),
                Event::IdiotLight(
                    a.id.clone(),
                    IdiotLightControl {
                        light: "Link".into(),
                        command: IdiotLightCommand::SetBgColor,
                        value: Some("green".into()),
                    }
                ),
                Event::KvpRemove(a.id.clone(), kvp),
                Event::KvpClear(a.id.clone()),
                Event::Special(a.id.clone(), SpecialCommand::ClearLog),
                Event::ClientCommandList(
                    a.id.clone(),
                    ClientCommandList {
                        commands: vec!["dump".into(), "stats".into()],
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_state_reports_dropped_before_grant() {
        let (mut a, mut b) = pair();
        send_all(&mut a, &mut b, &state_reports(Uuid::new_v4()));
        assert!(b.events.take().is_empty());

        // Our own debuggee role does not admit reports from the debugger
        handshake(&mut a, &mut b);
        a.events.take();
        send_all(&mut b, &mut a, &state_reports(Uuid::new_v4()));
        assert!(a.events.take().is_empty());
    }

    #[test]
    fn test_unrecognized_special_command_reaches_catch_all() {
        let (mut a, mut b) = pair();
        handshake(&mut a, &mut b);
        b.events.take();

        let odd = Command::new(MessageType::SpecialCommand).param("Command", "not-a-special");
        send_all(&mut a, &mut b, &[odd]);
        assert_eq!(
            b.events.take(),
            vec![Event::Unknown(
                a.id.clone(),
                MessageType::SpecialCommand.token().to_string()
            )]
        );
    }

    #[test]
    fn test_role_free_messages_arrive_before_handshake() {
        let (mut a, mut b) = pair();
        let change = DebuggerStateChange {
            state: "Paused".into(),
            is_debugger: true,
        };
        send_all(
            &mut b,
            &mut a,
            &[change.to_command(), broadcast_message("server restarting")],
        );
        assert_eq!(
            a.events.take(),
            vec![
                Event::DebuggerState(b.id.clone(), change),
                Event::Broadcast(b.id.clone(), "server restarting".into()),
            ]
        );
    }

    #[test]
    fn test_drop_as_client_ends_debuggee_session() {
        let (mut a, mut b) = pair();
        handshake(&mut a, &mut b);

        let (id, _) = a
            .dispatcher
            .send_correlated(&b.id, &Command::new(MessageType::PeerTypeRequest), MessageType::PeerTypeResponse)
            .unwrap();
        a.events.take();

        let dropped = b.dispatcher.drop_client(&a.id).unwrap();
        assert_eq!(b.dispatcher.state(&a.id), Some(HandshakeState::Disconnected));
        assert!(deliver(&b.id, &mut a, vec![dropped]).is_empty());

        assert_eq!(a.dispatcher.state(&b.id), Some(HandshakeState::Disconnected));
        assert_eq!(a.dispatcher.correlator().pending_count(), 0);
        assert_eq!(
            a.events.take(),
            vec![
                Event::SessionState(
                    b.id.clone(),
                    HandshakeState::GrantedAsDebuggee,
                    HandshakeState::Disconnected
                ),
                Event::Abandoned(id),
            ]
        );
        assert!(b.events.events().contains(&Event::SessionState(
            a.id.clone(),
            HandshakeState::GrantedAsDebugger,
            HandshakeState::Disconnected
        )));
    }

    #[test]
    fn test_crossed_requests_recover_by_close() {
        let mut a = peer("PeerA", AcceptPolicy::Grant, &[]);
        let mut b = peer("PeerB", AcceptPolicy::Grant, &[]);
        link(&mut a, &mut b);

        let from_a = a.dispatcher.request_connection(&b.id).unwrap();
        let from_b = b.dispatcher.request_connection(&a.id).unwrap();
        assert!(deliver(&a.id, &mut b, vec![from_a]).is_empty());
        assert!(deliver(&b.id, &mut a, vec![from_b]).is_empty());
        assert_eq!(a.dispatcher.state(&b.id), Some(HandshakeState::RequestSent));
        assert_eq!(b.dispatcher.state(&a.id), Some(HandshakeState::RequestSent));

        let close = a.dispatcher.close(&b.id).unwrap();
        let ack = deliver(&a.id, &mut b, vec![close]);
        deliver(&b.id, &mut a, ack);
        assert_eq!(b.dispatcher.state(&a.id), Some(HandshakeState::Disconnected));

        link(&mut a, &mut b);
        handshake(&mut a, &mut b);
        assert_eq!(
            a.dispatcher.state(&b.id),
            Some(HandshakeState::GrantedAsDebuggee)
        );
    }

    #[test]
    fn test_exclusive_session_blocks_other_debuggees() {
        let mut a = peer("PeerA", AcceptPolicy::Refuse, &[]);
        let mut b = peer("PeerB", AcceptPolicy::Grant, &[]);
        let mut c = peer("PeerC", AcceptPolicy::Refuse, &[]);
        link(&mut a, &mut b);
        link(&mut c, &mut b);

        let request = a.dispatcher.request_exclusive_connection(&b.id).unwrap();
        let wire = b.dispatcher.codec().decode(&request.frame);
        assert_eq!(wire.params.get("RequestExclusive"), Some("true"));
        let granted = deliver(&a.id, &mut b, vec![request]);
        deliver(&b.id, &mut a, granted);
        assert_eq!(
            a.dispatcher.state(&b.id),
            Some(HandshakeState::GrantedAsDebuggee)
        );
        assert!(b.dispatcher.session(&a.id).unwrap().is_exclusive());

        let request = c.dispatcher.request_connection(&b.id).unwrap();
        let refused = deliver(&c.id, &mut b, vec![request]);
        deliver(&b.id, &mut c, refused);
        assert_eq!(c.dispatcher.state(&b.id), Some(HandshakeState::Idle));
        assert_eq!(b.dispatcher.state(&c.id), Some(HandshakeState::Idle));

        // Once the exclusive debuggee leaves, others are granted again
        let close = a.dispatcher.close(&b.id).unwrap();
        deliver(&a.id, &mut b, vec![close]);
        handshake(&mut c, &mut b);
        assert_eq!(
            c.dispatcher.state(&b.id),
            Some(HandshakeState::GrantedAsDebuggee)
        );
    }

    #[test]
    fn test_exclusive_request_refused_while_shared() {
        let mut a = peer("PeerA", AcceptPolicy::Refuse, &[]);
        let mut b = peer("PeerB", AcceptPolicy::Grant, &[]);
        let mut c = peer("PeerC", AcceptPolicy::Refuse, &[]);
        link(&mut a, &mut b);
        link(&mut c, &mut b);
        handshake(&mut a, &mut b);

        let request = c.dispatcher.request_exclusive_connection(&b.id).unwrap();
        let refused = deliver(&c.id, &mut b, vec![request]);
        deliver(&b.id, &mut c, refused);
        assert_eq!(c.dispatcher.state(&b.id), Some(HandshakeState::Idle));
        assert_eq!(
            b.dispatcher.state(&a.id),
            Some(HandshakeState::GrantedAsDebugger)
        );
    }

    #[test]
    fn test_manual_grant_respects_exclusive_holder() {
        let mut a = peer("PeerA", AcceptPolicy::Refuse, &[]);
        let mut b = peer("PeerB", AcceptPolicy::Manual, &[]);
        let mut c = peer("PeerC", AcceptPolicy::Refuse, &[]);
        link(&mut a, &mut b);
        link(&mut c, &mut b);

        // Both requests are parked before either is granted
        let request = a.dispatcher.request_exclusive_connection(&b.id).unwrap();
        assert!(deliver(&a.id, &mut b, vec![request]).is_empty());
        let request = c.dispatcher.request_connection(&b.id).unwrap();
        assert!(deliver(&c.id, &mut b, vec![request]).is_empty());
        assert_eq!(
            b.dispatcher.state(&c.id),
            Some(HandshakeState::RequestReceived)
        );

        b.dispatcher.grant(&a.id).unwrap();
        assert!(matches!(
            b.dispatcher.grant(&c.id),
            Err(TDDebugError::Protocol(_))
        ));
        assert_eq!(
            b.dispatcher.state(&c.id),
            Some(HandshakeState::RequestReceived)
        );
        b.dispatcher.refuse(&c.id).unwrap();
    }
}
