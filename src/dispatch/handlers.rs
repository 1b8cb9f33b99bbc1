//! Application-facing event callbacks.
//!
//! The dispatcher never touches presentation state. It calls one method
//! of [`Handlers`] per semantic event; every method has a no-op default so
//! an application implements only what it displays.

use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use crate::catalog::SpecialCommand;
use crate::codec::DecodedFrame;
use crate::protocol::{
    ClientCommandList, ClientCommandRequest, ClientCommandResult, DebuggerStateChange,
    HandshakeState, Heartbeat, IdiotLightControl, KvpUpdate, PendingRequest, PeerTypeInfo,
    VersionInfo,
};
use crate::transport::{PeerId, PeerState};

/// How the message being handled relates to a correlated exchange
#[derive(Debug, Clone)]
pub enum Correlation {
    /// Plain, uncorrelated message
    None,
    /// Reply to one of our correlated requests
    Reply(PendingRequest),
    /// Peer's correlated request; our reply will carry this ID
    Request(Uuid),
}

/// Who sent the message being handled
#[derive(Debug, Clone)]
pub struct Context {
    /// Transport identity of the sender
    pub peer: PeerId,
    /// Sender's announced name, or the transport identity
    pub peer_name: String,
    /// Correlation of this message
    pub correlation: Correlation,
}

impl Context {
    /// ID of the request this message answers, if it is a reply
    pub fn reply_to(&self) -> Option<Uuid> {
        match &self.correlation {
            Correlation::Reply(request) => Some(request.id),
            _ => None,
        }
    }
}

/// Application callbacks.
#[allow(unused_variables)]
pub trait Handlers: Send {
    /// Single-line text arrived
    fn on_text_message(&mut self, ctx: &Context, text: &str) {}

    /// Multi-line text arrived
    fn on_text_block(&mut self, ctx: &Context, text: &str) {}

    /// Log line arrived
    fn on_log_message(&mut self, ctx: &Context, line: &str) {}

    /// Key-value pair inserted or updated
    fn on_kvp_upsert(&mut self, ctx: &Context, update: &KvpUpdate) {}

    /// Key-value pair removed
    fn on_kvp_remove(&mut self, ctx: &Context, id: Uuid) {}

    /// All key-value pairs dropped
    fn on_kvp_clear(&mut self, ctx: &Context) {}

    /// Idiot-light control requested
    fn on_idiot_light(&mut self, ctx: &Context, control: &IdiotLightControl) {}

    /// Special UI command requested
    fn on_special_command(&mut self, ctx: &Context, command: SpecialCommand) {}

    /// Client commands this side offers
    fn client_commands(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run a client command and report the outcome
    fn execute_client_command(
        &mut self,
        ctx: &Context,
        request: &ClientCommandRequest,
    ) -> ClientCommandResult {
        ClientCommandResult {
            name: request.name.clone(),
            success: false,
            result: format!("unknown command: {}", request.name),
        }
    }

    /// Client command result arrived
    fn on_client_command_result(&mut self, ctx: &Context, result: &ClientCommandResult) {}

    /// Client command list arrived
    fn on_client_command_list(&mut self, ctx: &Context, list: &ClientCommandList) {}

    /// Peer pushed its version
    fn on_version_info(&mut self, ctx: &Context, info: &VersionInfo) {}

    /// Peer reported a debugger state change
    fn on_debugger_state_changed(&mut self, ctx: &Context, change: &DebuggerStateChange) {}

    /// Peer announced its role
    fn on_peer_type(&mut self, ctx: &Context, info: &PeerTypeInfo) {}

    /// Echo reply arrived
    fn on_echo_return(&mut self, ctx: &Context, text: &str) {}

    /// Heartbeat arrived
    fn on_heartbeat(&mut self, ctx: &Context, heartbeat: &Heartbeat) {}

    /// Broadcast text arrived
    fn on_broadcast_message(&mut self, ctx: &Context, text: &str) {}

    /// Our handshake state with a peer changed
    fn on_session_state_changed(&mut self, peer: &PeerId, from: HandshakeState, to: HandshakeState) {}

    /// Transport connectivity to a peer changed
    fn on_peer_state_changed(&mut self, peer: &PeerId, state: PeerState) {}

    /// A correlated request was abandoned without a reply
    fn on_request_abandoned(&mut self, request: &PendingRequest) {}

    /// Frame with an unrecognized type or sub-command
    fn on_unknown(&mut self, ctx: &Context, frame: &DecodedFrame) {}
}

/// Handlers that only log, for headless nodes
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandlers;

impl Handlers for LoggingHandlers {
    fn on_text_message(&mut self, ctx: &Context, text: &str) {
        tracing::info!(peer = %ctx.peer_name, "text: {}", text);
    }

    fn on_text_block(&mut self, ctx: &Context, text: &str) {
        tracing::info!(peer = %ctx.peer_name, "text block:\n{}", text);
    }

    fn on_log_message(&mut self, ctx: &Context, line: &str) {
        tracing::info!(peer = %ctx.peer_name, "log: {}", line);
    }

    fn on_kvp_upsert(&mut self, ctx: &Context, update: &KvpUpdate) {
        tracing::info!(peer = %ctx.peer_name, id = %update.id, "kvp {} = {}", update.key, update.value);
    }

    fn on_kvp_remove(&mut self, ctx: &Context, id: Uuid) {
        tracing::info!(peer = %ctx.peer_name, id = %id, "kvp removed");
    }

    fn on_idiot_light(&mut self, ctx: &Context, control: &IdiotLightControl) {
        tracing::info!(
            peer = %ctx.peer_name,
            light = %control.light,
            command = ?control.command,
            value = ?control.value,
            "idiot light"
        );
    }

    fn on_special_command(&mut self, ctx: &Context, command: SpecialCommand) {
        tracing::info!(peer = %ctx.peer_name, "special command {}", command);
    }

    fn on_client_command_result(&mut self, ctx: &Context, result: &ClientCommandResult) {
        tracing::info!(
            peer = %ctx.peer_name,
            success = result.success,
            "{} -> {}",
            result.name,
            result.result
        );
    }

    fn on_version_info(&mut self, ctx: &Context, info: &VersionInfo) {
        tracing::info!(
            peer = %ctx.peer_name,
            "{} {} (protocol {})",
            info.program,
            info.version,
            info.protocol
        );
    }

    fn on_echo_return(&mut self, ctx: &Context, text: &str) {
        tracing::info!(peer = %ctx.peer_name, "echo: {}", text);
    }

    fn on_broadcast_message(&mut self, ctx: &Context, text: &str) {
        tracing::info!(peer = %ctx.peer_name, "broadcast: {}", text);
    }

    fn on_session_state_changed(&mut self, peer: &PeerId, from: HandshakeState, to: HandshakeState) {
        tracing::info!(peer = %peer, "session {} -> {}", from, to);
    }

    fn on_peer_state_changed(&mut self, peer: &PeerId, state: PeerState) {
        tracing::info!(peer = %peer, "peer {:?}", state);
    }

    fn on_unknown(&mut self, ctx: &Context, frame: &DecodedFrame) {
        tracing::warn!(peer = %ctx.peer_name, token = %frame.token, payload = %frame.payload, "unknown frame");
    }
}

/// Event captured by [`RecordingHandlers`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Text message
    Text(PeerId, String),
    /// Text block
    TextBlock(PeerId, String),
    /// Log line
    Log(PeerId, String),
    /// KVP upsert
    KvpUpsert(PeerId, KvpUpdate),
    /// KVP removal
    KvpRemove(PeerId, Uuid),
    /// KVP clear
    KvpClear(PeerId),
    /// Idiot light
    IdiotLight(PeerId, IdiotLightControl),
    /// Special command
    Special(PeerId, SpecialCommand),
    /// Client command executed locally
    ClientCommandExecuted(PeerId, ClientCommandRequest),
    /// Client command result, with the request ID it answers
    ClientCommandResult(PeerId, Option<Uuid>, ClientCommandResult),
    /// Client command list
    ClientCommandList(PeerId, ClientCommandList),
    /// Version info
    Version(PeerId, VersionInfo),
    /// Debugger state change
    DebuggerState(PeerId, DebuggerStateChange),
    /// Peer type
    PeerType(PeerId, PeerTypeInfo),
    /// Echo reply, with the request ID it answers
    EchoReturn(PeerId, Option<Uuid>, String),
    /// Heartbeat
    Heartbeat(PeerId, Heartbeat),
    /// Broadcast text
    Broadcast(PeerId, String),
    /// Session state change
    SessionState(PeerId, HandshakeState, HandshakeState),
    /// Transport state change
    PeerState(PeerId, PeerState),
    /// Abandoned request
    Abandoned(Uuid),
    /// Unknown frame token
    Unknown(PeerId, String),
}

/// Handlers that record every event into a shared list.
///
/// Clones share the same list, so a test can keep one clone while the
/// node owns another. Client commands listed in `commands` succeed and
/// answer with their arguments joined by spaces.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandlers {
    events: Arc<Mutex<Vec<Event>>>,
    commands: Vec<String>,
}

impl RecordingHandlers {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer client commands
    pub fn with_commands(mut self, commands: &[&str]) -> Self {
        self.commands = commands.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Drain recorded events
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.lock())
    }

    fn push(&self, event: Event) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Handlers for RecordingHandlers {
    fn on_text_message(&mut self, ctx: &Context, text: &str) {
        self.push(Event::Text(ctx.peer.clone(), text.to_string()));
    }

    fn on_text_block(&mut self, ctx: &Context, text: &str) {
        self.push(Event::TextBlock(ctx.peer.clone(), text.to_string()));
    }

    fn on_log_message(&mut self, ctx: &Context, line: &str) {
        self.push(Event::Log(ctx.peer.clone(), line.to_string()));
    }

    fn on_kvp_upsert(&mut self, ctx: &Context, update: &KvpUpdate) {
        self.push(Event::KvpUpsert(ctx.peer.clone(), update.clone()));
    }

    fn on_kvp_remove(&mut self, ctx: &Context, id: Uuid) {
        self.push(Event::KvpRemove(ctx.peer.clone(), id));
    }

    fn on_kvp_clear(&mut self, ctx: &Context) {
        self.push(Event::KvpClear(ctx.peer.clone()));
    }

    fn on_idiot_light(&mut self, ctx: &Context, control: &IdiotLightControl) {
        self.push(Event::IdiotLight(ctx.peer.clone(), control.clone()));
    }

    fn on_special_command(&mut self, ctx: &Context, command: SpecialCommand) {
        self.push(Event::Special(ctx.peer.clone(), command));
    }

    fn client_commands(&self) -> Vec<String> {
        self.commands.clone()
    }

    fn execute_client_command(
        &mut self,
        ctx: &Context,
        request: &ClientCommandRequest,
    ) -> ClientCommandResult {
        self.push(Event::ClientCommandExecuted(ctx.peer.clone(), request.clone()));
        if self.commands.contains(&request.name) {
            ClientCommandResult {
                name: request.name.clone(),
                success: true,
                result: request.args.join(" "),
            }
        } else {
            ClientCommandResult {
                name: request.name.clone(),
                success: false,
                result: format!("unknown command: {}", request.name),
            }
        }
    }

    fn on_client_command_result(&mut self, ctx: &Context, result: &ClientCommandResult) {
        self.push(Event::ClientCommandResult(
            ctx.peer.clone(),
            ctx.reply_to(),
            result.clone(),
        ));
    }

    fn on_client_command_list(&mut self, ctx: &Context, list: &ClientCommandList) {
        self.push(Event::ClientCommandList(ctx.peer.clone(), list.clone()));
    }

    fn on_version_info(&mut self, ctx: &Context, info: &VersionInfo) {
        self.push(Event::Version(ctx.peer.clone(), info.clone()));
    }

    fn on_debugger_state_changed(&mut self, ctx: &Context, change: &DebuggerStateChange) {
        self.push(Event::DebuggerState(ctx.peer.clone(), change.clone()));
    }

    fn on_peer_type(&mut self, ctx: &Context, info: &PeerTypeInfo) {
        self.push(Event::PeerType(ctx.peer.clone(), info.clone()));
    }

    fn on_echo_return(&mut self, ctx: &Context, text: &str) {
        self.push(Event::EchoReturn(
            ctx.peer.clone(),
            ctx.reply_to(),
            text.to_string(),
        ));
    }

    fn on_heartbeat(&mut self, ctx: &Context, heartbeat: &Heartbeat) {
        self.push(Event::Heartbeat(ctx.peer.clone(), *heartbeat));
    }

    fn on_broadcast_message(&mut self, ctx: &Context, text: &str) {
        self.push(Event::Broadcast(ctx.peer.clone(), text.to_string()));
    }

    fn on_session_state_changed(&mut self, peer: &PeerId, from: HandshakeState, to: HandshakeState) {
        self.push(Event::SessionState(peer.clone(), from, to));
    }

    fn on_peer_state_changed(&mut self, peer: &PeerId, state: PeerState) {
        self.push(Event::PeerState(peer.clone(), state));
    }

    fn on_request_abandoned(&mut self, request: &PendingRequest) {
        self.push(Event::Abandoned(request.id));
    }

    fn on_unknown(&mut self, ctx: &Context, frame: &DecodedFrame) {
        self.push(Event::Unknown(ctx.peer.clone(), frame.token.clone()));
    }
}
