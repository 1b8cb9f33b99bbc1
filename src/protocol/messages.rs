//! Typed payloads for each message shape.
//!
//! Each payload converts to a [`Command`] for encoding and parses back from
//! a decoded one. Parsing applies the documented defaults for absent
//! optional fields and returns [`TDDebugError::InvalidValue`] for fields
//! that are present but malformed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{HandshakeCommand, IdiotLightCommand, MessageType, SpecialCommand};
use crate::codec::Command;
use crate::error::{Result, TDDebugError};

/// Conversion between a typed payload and a [`Command`]
pub trait Payload: Sized {
    /// Message type this payload travels as
    const TYPE: MessageType;

    /// Build the command
    fn to_command(&self) -> Command;

    /// Parse from a decoded command's parameters
    fn from_command(command: &Command) -> Result<Self>;
}

fn optional(command: &Command, name: &str) -> Option<String> {
    command.params.get(name).map(str::to_string)
}

fn non_negative(command: &Command, name: &str) -> Result<u64> {
    let v = command.params.int_or_default(name)?;
    u64::try_from(v).map_err(|_| TDDebugError::invalid_value(name, &v.to_string(), "non-negative integer"))
}

/// Handshake frame: sub-command plus flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    /// Sub-command
    pub command: HandshakeCommand,
    /// Requester wants to be the debugger's only client
    pub request_exclusive: bool,
    /// Sender's display name
    pub peer_name: Option<String>,
}

impl HandshakeMessage {
    /// Message for a sub-command with default flags
    pub fn new(command: HandshakeCommand) -> Self {
        Self {
            command,
            request_exclusive: false,
            peer_name: None,
        }
    }

    /// Attach the sender's name
    pub fn with_peer_name(mut self, name: impl Into<String>) -> Self {
        self.peer_name = Some(name.into());
        self
    }

    /// Ask to be the debugger's only client
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.request_exclusive = exclusive;
        self
    }
}

impl Payload for HandshakeMessage {
    const TYPE: MessageType = MessageType::HandShake;

    fn to_command(&self) -> Command {
        Command::new(Self::TYPE)
            .param("Command", self.command.token())
            .param("RequestExclusive", self.request_exclusive.to_string())
            .param("PeerName", self.peer_name.clone().unwrap_or_default())
    }

    /// A missing or unrecognized `Command` yields `HandshakeCommand::Unknown`
    /// so the state machine can log it; a malformed `RequestExclusive` is an
    /// error.
    fn from_command(command: &Command) -> Result<Self> {
        let sub = match command.params.get("Command") {
            Some(token) => HandshakeCommand::from_token(token),
            None => {
                let last = command.params.iter().last().map(|(k, v)| format!("{k}={v}"));
                tracing::warn!(payload = ?last, "handshake frame without Command");
                HandshakeCommand::Unknown
            },
        };
        Ok(Self {
            command: sub,
            request_exclusive: command.params.bool_or_default("RequestExclusive")?,
            peer_name: optional(command, "PeerName"),
        })
    }
}

/// Key-value upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvpUpdate {
    /// Stable row identity
    pub id: Uuid,
    /// Key
    pub key: String,
    /// Value
    pub value: String,
}

impl KvpUpdate {
    /// Create an update
    pub fn new(id: Uuid, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Payload for KvpUpdate {
    const TYPE: MessageType = MessageType::KvpData;

    fn to_command(&self) -> Command {
        Command::new(Self::TYPE)
            .param("ID", self.id.to_string())
            .param("Key", &self.key)
            .param("Value", &self.value)
    }

    fn from_command(command: &Command) -> Result<Self> {
        Ok(Self {
            id: command.params.uuid("ID")?,
            key: command.params.require("Key")?.to_string(),
            value: command.params.string_or_default("Value"),
        })
    }
}

/// Key-value removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvpRemove {
    /// Row to remove
    pub id: Uuid,
}

impl Payload for KvpRemove {
    const TYPE: MessageType = MessageType::KvpRemove;

    fn to_command(&self) -> Command {
        Command::new(Self::TYPE).param("ID", self.id.to_string())
    }

    fn from_command(command: &Command) -> Result<Self> {
        Ok(Self {
            id: command.params.uuid("ID")?,
        })
    }
}

/// Idiot-light control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdiotLightControl {
    /// Light name
    pub light: String,
    /// Operation
    pub command: IdiotLightCommand,
    /// Text or color for the `Set*` operations
    pub value: Option<String>,
}

impl Payload for IdiotLightControl {
    const TYPE: MessageType = MessageType::ControlIdiotLight;

    fn to_command(&self) -> Command {
        Command::new(Self::TYPE)
            .param("Light", &self.light)
            .param("Command", self.command.code().to_string())
            .param("Value", self.value.clone().unwrap_or_default())
    }

    fn from_command(command: &Command) -> Result<Self> {
        Ok(Self {
            light: command.params.require("Light")?.to_string(),
            command: IdiotLightCommand::from_code(command.params.int_or_default("Command")?),
            value: optional(command, "Value"),
        })
    }
}

/// Echo request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoRequest {
    /// Text to reverse
    pub message: String,
    /// Seconds to wait before replying
    pub delay_secs: u64,
    /// Peer that should receive the reply (defaults to the sender)
    pub echo_back_to: Option<String>,
}

impl EchoRequest {
    /// The reply text: `message` reversed
    pub fn reversed(&self) -> String {
        self.message.chars().rev().collect()
    }
}

impl Payload for EchoRequest {
    const TYPE: MessageType = MessageType::EchoMessage;

    fn to_command(&self) -> Command {
        Command::new(Self::TYPE)
            .param("Message", &self.message)
            .param("Delay", self.delay_secs.to_string())
            .param("EchoBackTo", self.echo_back_to.clone().unwrap_or_default())
    }

    fn from_command(command: &Command) -> Result<Self> {
        Ok(Self {
            message: command.params.string_or_default("Message"),
            delay_secs: non_negative(command, "Delay")?,
            echo_back_to: optional(command, "EchoBackTo"),
        })
    }
}

/// Heartbeat (app or connection)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// `AppHeartbeat` or `ConnectionHeartbeat`
    pub kind: MessageType,
    /// Monotonic counter chosen by the sender
    pub sequence: u64,
}

impl Heartbeat {
    /// Build a heartbeat command
    pub fn to_command(&self) -> Command {
        Command::new(self.kind).param("Sequence", self.sequence.to_string())
    }

    /// Parse either heartbeat type
    pub fn from_command(command: &Command) -> Result<Self> {
        Ok(Self {
            kind: command.message_type,
            sequence: non_negative(command, "Sequence")?,
        })
    }
}

/// Request to run a named client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCommandRequest {
    /// Command name
    pub name: String,
    /// Arguments in order
    pub args: Vec<String>,
}

impl Payload for ClientCommandRequest {
    const TYPE: MessageType = MessageType::ClientCommandRequest;

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(Self::TYPE).param("Name", &self.name);
        for arg in &self.args {
            cmd = cmd.param("Arg", arg);
        }
        cmd
    }

    fn from_command(command: &Command) -> Result<Self> {
        Ok(Self {
            name: command.params.require("Name")?.to_string(),
            args: command
                .params
                .get_all("Arg")
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }
}

/// Result of a client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCommandResult {
    /// Command name
    pub name: String,
    /// Whether it succeeded
    pub success: bool,
    /// Output or error text
    pub result: String,
}

impl Payload for ClientCommandResult {
    const TYPE: MessageType = MessageType::ClientCommandResponse;

    fn to_command(&self) -> Command {
        Command::new(Self::TYPE)
            .param("Name", &self.name)
            .param("Success", self.success.to_string())
            .param("Result", &self.result)
    }

    fn from_command(command: &Command) -> Result<Self> {
        Ok(Self {
            name: command.params.string_or_default("Name"),
            success: command.params.bool_or_default("Success")?,
            result: command.params.string_or_default("Result"),
        })
    }
}

/// Client commands a debuggee offers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCommandList {
    /// Command names
    pub commands: Vec<String>,
}

impl Payload for ClientCommandList {
    const TYPE: MessageType = MessageType::ClientCommandList;

    fn to_command(&self) -> Command {
        self.commands
            .iter()
            .fold(Command::new(Self::TYPE), |cmd, name| cmd.param("Command", name))
    }

    fn from_command(command: &Command) -> Result<Self> {
        Ok(Self {
            commands: command
                .params
                .get_all("Command")
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }
}

/// Program and protocol version push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Program name
    pub program: String,
    /// Program version
    pub version: String,
    /// Wire protocol version
    pub protocol: String,
}

impl VersionInfo {
    /// This library's version info for a program
    pub fn current(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            version: crate::VERSION.to_string(),
            protocol: crate::PROTOCOL_VERSION.to_string(),
        }
    }

    /// Whether the peer speaks the same wire protocol
    pub fn is_compatible(&self) -> bool {
        self.protocol == crate::PROTOCOL_VERSION
    }
}

impl Payload for VersionInfo {
    const TYPE: MessageType = MessageType::VersionInfo;

    fn to_command(&self) -> Command {
        Command::new(Self::TYPE)
            .param("Program", &self.program)
            .param("Version", &self.version)
            .param("Protocol", &self.protocol)
    }

    fn from_command(command: &Command) -> Result<Self> {
        Ok(Self {
            program: command.params.string_or_default("Program"),
            version: command.params.string_or_default("Version"),
            protocol: command.params.string_or_default("Protocol"),
        })
    }
}

/// Role a peer plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerType {
    /// Acts as debugger
    Debugger,
    /// Acts as debuggee
    Debuggee,
    /// No role yet
    Peer,
}

impl PeerType {
    /// Wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerType::Debugger => "debugger",
            PeerType::Debuggee => "debuggee",
            PeerType::Peer => "peer",
        }
    }

    /// Parse a wire value; anything unrecognized is `Peer`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "debugger" => PeerType::Debugger,
            "debuggee" => PeerType::Debuggee,
            _ => PeerType::Peer,
        }
    }
}

/// Role announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTypeInfo {
    /// Role
    pub peer_type: PeerType,
    /// Display name
    pub name: String,
}

impl Payload for PeerTypeInfo {
    const TYPE: MessageType = MessageType::PeerTypeResponse;

    fn to_command(&self) -> Command {
        Command::new(Self::TYPE)
            .param("PeerType", self.peer_type.as_str())
            .param("PeerName", &self.name)
    }

    fn from_command(command: &Command) -> Result<Self> {
        Ok(Self {
            peer_type: PeerType::parse(&command.params.string_or_default("PeerType")),
            name: command.params.string_or_default("PeerName"),
        })
    }
}

/// Remote debugger state notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerStateChange {
    /// State name
    pub state: String,
    /// Whether the sender is acting as debugger
    pub is_debugger: bool,
}

impl Payload for DebuggerStateChange {
    const TYPE: MessageType = MessageType::DebuggerStateChanged;

    fn to_command(&self) -> Command {
        Command::new(Self::TYPE)
            .param("State", &self.state)
            .param("IsDebugger", self.is_debugger.to_string())
    }

    fn from_command(command: &Command) -> Result<Self> {
        Ok(Self {
            state: command.params.string_or_default("State"),
            is_debugger: command.params.bool_or_default("IsDebugger")?,
        })
    }
}

/// Text message
pub fn text_message(text: &str) -> Command {
    Command::new(MessageType::TextMessage).param("Message", text)
}

/// Multi-line text block
pub fn text_block(text: &str) -> Command {
    Command::new(MessageType::TextBlock).param("Message", text)
}

/// Log line
pub fn log_message(line: &str) -> Command {
    Command::new(MessageType::LogMessage).param("Message", line)
}

/// Echo reply
pub fn echo_return(text: &str) -> Command {
    Command::new(MessageType::EchoReturn).param("Message", text)
}

/// Broadcast text
pub fn broadcast_message(text: &str) -> Command {
    Command::new(MessageType::BroadcastMessage).param("Message", text)
}

/// Broadcast a pre-encoded command
pub fn broadcast_command(inner_frame: &str) -> Command {
    Command::new(MessageType::BroadcastCommand).param("Command", inner_frame)
}

/// Special UI command
pub fn special(command: SpecialCommand) -> Command {
    Command::new(MessageType::SpecialCommand).param("Command", command.token())
}

/// Parse the sub-command of a `SpecialCommand` frame
pub fn parse_special(command: &Command) -> SpecialCommand {
    command
        .params
        .get("Command")
        .map_or(SpecialCommand::Unknown, SpecialCommand::from_token)
}

/// Text carried in the `Message` parameter
pub fn message_text(command: &Command) -> String {
    command.params.string_or_default("Message")
}
