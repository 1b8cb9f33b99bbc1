//! Message type identifiers and their wire tokens.

use phf::phf_map;
use serde::{Deserialize, Serialize};

/// Semantic kind of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Single line of text for the remote console
    TextMessage,
    /// Multi-line block of text
    TextBlock,
    /// Log line
    LogMessage,
    /// Idiot-light control
    ControlIdiotLight,
    /// Echo request; the receiver reverses the text and sends it back
    EchoMessage,
    /// Echo reply
    EchoReturn,
    /// Application liveness heartbeat
    AppHeartbeat,
    /// Connection liveness heartbeat
    ConnectionHeartbeat,
    /// Ask the peer for an immediate connection heartbeat
    RequestConnectionHeartbeat,
    /// Key-value upsert
    KvpData,
    /// Key-value removal
    KvpRemove,
    /// Drop all key-value pairs
    KvpClear,
    /// UI-level special command
    SpecialCommand,
    /// Handshake sub-command carrier
    HandShake,
    /// Run a named client command on the debuggee
    ClientCommandRequest,
    /// Result of a client command
    ClientCommandResponse,
    /// Ask the debuggee which client commands it offers
    ClientCommandListRequest,
    /// List of client commands
    ClientCommandList,
    /// Command wrapped with a correlation ID
    IdEncapsulatedCommand,
    /// Program/version push
    VersionInfo,
    /// Ask the peer which role it plays
    PeerTypeRequest,
    /// Role announcement
    PeerTypeResponse,
    /// Text sent to every peer
    BroadcastMessage,
    /// Command sent to every peer
    BroadcastCommand,
    /// Remote debugger state changed
    DebuggerStateChanged,
    /// Unrecognized token
    Unknown,
}

static TOKEN_TO_TYPE: phf::Map<&'static str, MessageType> = phf_map! {
    "2ab1cdf9-fef4-4bbf-83c0-0124d98b1047" => MessageType::TextMessage,
    "a2e0c914-fa51-4fa0-ad1e-10be5513e324" => MessageType::TextBlock,
    "0261dc09-fe29-4f2b-85d0-eb914477124b" => MessageType::LogMessage,
    "557d27c3-bbf6-463e-8954-f6aa0afeefb1" => MessageType::ControlIdiotLight,
    "14a81f41-a9ea-4b8b-85a6-9ba800f6eb25" => MessageType::EchoMessage,
    "9c5f8763-67b6-4941-a16c-f20afc847193" => MessageType::EchoReturn,
    "af6b52ba-c090-4240-9792-bf85b667f583" => MessageType::AppHeartbeat,
    "bcfb42f0-1520-4297-9f66-6f6c7353375b" => MessageType::ConnectionHeartbeat,
    "17560985-35ba-46d8-b1f8-91616c9bc426" => MessageType::RequestConnectionHeartbeat,
    "96fc92b2-4635-44d6-989c-c2ce1bf5dec9" => MessageType::KvpData,
    "8a7805c6-394a-4fb0-ab62-f59bf84a8526" => MessageType::KvpRemove,
    "01f3af57-89c3-4881-b375-84683a2c2278" => MessageType::KvpClear,
    "bf551bcb-806e-40b3-9453-3a26bb2e858f" => MessageType::SpecialCommand,
    "939c909d-230b-49fa-b944-e990267b5eb5" => MessageType::HandShake,
    "b918a05c-2bf6-4a18-a97f-2e36ff49c58a" => MessageType::ClientCommandRequest,
    "b8b19e35-5d27-4463-aba2-199624eb0610" => MessageType::ClientCommandResponse,
    "66eff526-99b3-4821-8456-3016f06a0d05" => MessageType::ClientCommandListRequest,
    "e9f21acf-5ada-479b-9acb-f14519485c06" => MessageType::ClientCommandList,
    "f3e1531e-536d-485e-b730-0309ae52de96" => MessageType::IdEncapsulatedCommand,
    "3e6c3559-66cd-4599-bc4b-e1c3e47e52a9" => MessageType::VersionInfo,
    "c1775f31-987b-4d0f-a70f-0a49a6444b3f" => MessageType::PeerTypeRequest,
    "b60c470e-80ea-4ad0-8819-8880be54b248" => MessageType::PeerTypeResponse,
    "65d2a3e9-3ab1-45fb-8348-ad71de3b6883" => MessageType::BroadcastMessage,
    "962ea895-d423-4f4a-b860-6b600c11bee6" => MessageType::BroadcastCommand,
    "8a4dc206-ab2e-475e-82c3-dd5e6f175600" => MessageType::DebuggerStateChanged,
    "2b844368-1be8-40d5-a6e6-79931ac62227" => MessageType::Unknown,
};

impl MessageType {
    /// Stable wire token for this type
    pub fn token(&self) -> &'static str {
        match self {
            MessageType::TextMessage => "2ab1cdf9-fef4-4bbf-83c0-0124d98b1047",
            MessageType::TextBlock => "a2e0c914-fa51-4fa0-ad1e-10be5513e324",
            MessageType::LogMessage => "0261dc09-fe29-4f2b-85d0-eb914477124b",
            MessageType::ControlIdiotLight => "557d27c3-bbf6-463e-8954-f6aa0afeefb1",
            MessageType::EchoMessage => "14a81f41-a9ea-4b8b-85a6-9ba800f6eb25",
            MessageType::EchoReturn => "9c5f8763-67b6-4941-a16c-f20afc847193",
            MessageType::AppHeartbeat => "af6b52ba-c090-4240-9792-bf85b667f583",
            MessageType::ConnectionHeartbeat => "bcfb42f0-1520-4297-9f66-6f6c7353375b",
            MessageType::RequestConnectionHeartbeat => "17560985-35ba-46d8-b1f8-91616c9bc426",
            MessageType::KvpData => "96fc92b2-4635-44d6-989c-c2ce1bf5dec9",
            MessageType::KvpRemove => "8a7805c6-394a-4fb0-ab62-f59bf84a8526",
            MessageType::KvpClear => "01f3af57-89c3-4881-b375-84683a2c2278",
            MessageType::SpecialCommand => "bf551bcb-806e-40b3-9453-3a26bb2e858f",
            MessageType::HandShake => "939c909d-230b-49fa-b944-e990267b5eb5",
            MessageType::ClientCommandRequest => "b918a05c-2bf6-4a18-a97f-2e36ff49c58a",
            MessageType::ClientCommandResponse => "b8b19e35-5d27-4463-aba2-199624eb0610",
            MessageType::ClientCommandListRequest => "66eff526-99b3-4821-8456-3016f06a0d05",
            MessageType::ClientCommandList => "e9f21acf-5ada-479b-9acb-f14519485c06",
            MessageType::IdEncapsulatedCommand => "f3e1531e-536d-485e-b730-0309ae52de96",
            MessageType::VersionInfo => "3e6c3559-66cd-4599-bc4b-e1c3e47e52a9",
            MessageType::PeerTypeRequest => "c1775f31-987b-4d0f-a70f-0a49a6444b3f",
            MessageType::PeerTypeResponse => "b60c470e-80ea-4ad0-8819-8880be54b248",
            MessageType::BroadcastMessage => "65d2a3e9-3ab1-45fb-8348-ad71de3b6883",
            MessageType::BroadcastCommand => "962ea895-d423-4f4a-b860-6b600c11bee6",
            MessageType::DebuggerStateChanged => "8a4dc206-ab2e-475e-82c3-dd5e6f175600",
            MessageType::Unknown => "2b844368-1be8-40d5-a6e6-79931ac62227",
        }
    }

    /// Look up a token, ignoring ASCII case. Unrecognized tokens map to `Unknown`.
    pub fn from_token(token: &str) -> Self {
        Self::lookup(token).unwrap_or(MessageType::Unknown)
    }

    /// Look up a token, returning `None` when it is not in the catalog.
    pub fn lookup(token: &str) -> Option<Self> {
        TOKEN_TO_TYPE.get(token.to_ascii_lowercase().as_str()).copied()
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::TextMessage => "TextMessage",
            MessageType::TextBlock => "TextBlock",
            MessageType::LogMessage => "LogMessage",
            MessageType::ControlIdiotLight => "ControlIdiotLight",
            MessageType::EchoMessage => "EchoMessage",
            MessageType::EchoReturn => "EchoReturn",
            MessageType::AppHeartbeat => "AppHeartbeat",
            MessageType::ConnectionHeartbeat => "ConnectionHeartbeat",
            MessageType::RequestConnectionHeartbeat => "RequestConnectionHeartbeat",
            MessageType::KvpData => "KVPData",
            MessageType::KvpRemove => "KVPRemove",
            MessageType::KvpClear => "KVPClear",
            MessageType::SpecialCommand => "SpecialCommand",
            MessageType::HandShake => "HandShake",
            MessageType::ClientCommandRequest => "ClientCommandRequest",
            MessageType::ClientCommandResponse => "ClientCommandResponse",
            MessageType::ClientCommandListRequest => "ClientCommandListRequest",
            MessageType::ClientCommandList => "ClientCommandList",
            MessageType::IdEncapsulatedCommand => "IDEncapsulatedCommand",
            MessageType::VersionInfo => "VersionInfo",
            MessageType::PeerTypeRequest => "PeerTypeRequest",
            MessageType::PeerTypeResponse => "PeerTypeResponse",
            MessageType::BroadcastMessage => "BroadcastMessage",
            MessageType::BroadcastCommand => "BroadcastCommand",
            MessageType::DebuggerStateChanged => "DebuggerStateChanged",
            MessageType::Unknown => "Unknown",
        }
    }

    /// All message types in catalog order
    pub fn all() -> &'static [MessageType] {
        &[
            MessageType::TextMessage,
            MessageType::TextBlock,
            MessageType::LogMessage,
            MessageType::ControlIdiotLight,
            MessageType::EchoMessage,
            MessageType::EchoReturn,
            MessageType::AppHeartbeat,
            MessageType::ConnectionHeartbeat,
            MessageType::RequestConnectionHeartbeat,
            MessageType::KvpData,
            MessageType::KvpRemove,
            MessageType::KvpClear,
            MessageType::SpecialCommand,
            MessageType::HandShake,
            MessageType::ClientCommandRequest,
            MessageType::ClientCommandResponse,
            MessageType::ClientCommandListRequest,
            MessageType::ClientCommandList,
            MessageType::IdEncapsulatedCommand,
            MessageType::VersionInfo,
            MessageType::PeerTypeRequest,
            MessageType::PeerTypeResponse,
            MessageType::BroadcastMessage,
            MessageType::BroadcastCommand,
            MessageType::DebuggerStateChanged,
            MessageType::Unknown,
        ]
    }

    /// Find a type by its human-readable name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }

    /// Whether this type reports debuggee state to a debugger.
    ///
    /// Only a peer we have granted as debuggee may send these.
    pub fn is_state_report(&self) -> bool {
        matches!(
            self,
            MessageType::TextMessage
                | MessageType::TextBlock
                | MessageType::LogMessage
                | MessageType::ControlIdiotLight
                | MessageType::KvpData
                | MessageType::KvpRemove
                | MessageType::KvpClear
                | MessageType::SpecialCommand
                | MessageType::ClientCommandResponse
                | MessageType::ClientCommandList
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
