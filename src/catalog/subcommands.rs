//! Sub-command enumerations carried inside specific message types.

use phf::phf_map;
use serde::{Deserialize, Serialize};

/// Handshake sub-command, carried in a `HandShake` frame's `Command` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakeCommand {
    /// Sender asks to become the receiver's debuggee
    RequestConnection,
    /// Receiver agreed to act as debugger
    ConnectionGranted,
    /// Receiver declined
    ConnectionRefused,
    /// Sender is closing the session
    ConnectionClose,
    /// Session is over
    Disconnected,
    /// Debugger drops its debuggee
    DropAsClient,
    /// Unrecognized sub-command
    Unknown,
}

static HANDSHAKE_TOKENS: phf::Map<&'static str, HandshakeCommand> = phf_map! {
    "906d03ff-8399-4513-b0cc-c4f14f0b6f59" => HandshakeCommand::RequestConnection,
    "6cc11a4a-8cf4-4a85-acfc-1015abe0156f" => HandshakeCommand::ConnectionGranted,
    "c7f017b4-7de0-4adc-867f-667d0c9209f3" => HandshakeCommand::ConnectionRefused,
    "99879e7c-bce1-4e23-9702-354272aa356a" => HandshakeCommand::ConnectionClose,
    "1cd18193-df70-40fc-8787-29f8e1ba2fa1" => HandshakeCommand::Disconnected,
    "601c6130-f162-4183-ad90-53fe98520abb" => HandshakeCommand::DropAsClient,
    "5c4cea5b-cb15-48be-a3b5-bf61ea187c8b" => HandshakeCommand::Unknown,
};

impl HandshakeCommand {
    /// Stable wire token
    pub fn token(&self) -> &'static str {
        match self {
            HandshakeCommand::RequestConnection => "906d03ff-8399-4513-b0cc-c4f14f0b6f59",
            HandshakeCommand::ConnectionGranted => "6cc11a4a-8cf4-4a85-acfc-1015abe0156f",
            HandshakeCommand::ConnectionRefused => "c7f017b4-7de0-4adc-867f-667d0c9209f3",
            HandshakeCommand::ConnectionClose => "99879e7c-bce1-4e23-9702-354272aa356a",
            HandshakeCommand::Disconnected => "1cd18193-df70-40fc-8787-29f8e1ba2fa1",
            HandshakeCommand::DropAsClient => "601c6130-f162-4183-ad90-53fe98520abb",
            HandshakeCommand::Unknown => "5c4cea5b-cb15-48be-a3b5-bf61ea187c8b",
        }
    }

    /// Look up a token (case-insensitive); unrecognized tokens map to `Unknown`
    pub fn from_token(token: &str) -> Self {
        Self::lookup(token).unwrap_or(HandshakeCommand::Unknown)
    }

    /// Look up a token, returning `None` when it is not in the catalog
    pub fn lookup(token: &str) -> Option<Self> {
        HANDSHAKE_TOKENS
            .get(token.to_ascii_lowercase().as_str())
            .copied()
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeCommand::RequestConnection => "RequestConnection",
            HandshakeCommand::ConnectionGranted => "ConnectionGranted",
            HandshakeCommand::ConnectionRefused => "ConnectionRefused",
            HandshakeCommand::ConnectionClose => "ConnectionClose",
            HandshakeCommand::Disconnected => "Disconnected",
            HandshakeCommand::DropAsClient => "DropAsClient",
            HandshakeCommand::Unknown => "Unknown",
        }
    }

    /// All handshake sub-commands
    pub fn all() -> &'static [HandshakeCommand] {
        &[
            HandshakeCommand::RequestConnection,
            HandshakeCommand::ConnectionGranted,
            HandshakeCommand::ConnectionRefused,
            HandshakeCommand::ConnectionClose,
            HandshakeCommand::Disconnected,
            HandshakeCommand::DropAsClient,
            HandshakeCommand::Unknown,
        ]
    }
}

impl std::fmt::Display for HandshakeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// UI-level special command, carried in a `SpecialCommand` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialCommand {
    /// Clear the log view
    ClearLog,
    /// Clear the key-value table
    ClearKvp,
    /// Return every idiot light to its default state
    ResetIdiotLights,
    /// Unrecognized command
    Unknown,
}

static SPECIAL_TOKENS: phf::Map<&'static str, SpecialCommand> = phf_map! {
    "e3470b87-1c5c-49eb-835e-cb0df09d8ad0" => SpecialCommand::ClearLog,
    "33964d99-5486-49d2-9c4e-b0b270430a9b" => SpecialCommand::ClearKvp,
    "3dc53134-d52e-43c8-ac26-a9e8064d3ed7" => SpecialCommand::ResetIdiotLights,
    "59e28419-70fc-4bf8-b636-2539323071b3" => SpecialCommand::Unknown,
};

impl SpecialCommand {
    /// Stable wire token
    pub fn token(&self) -> &'static str {
        match self {
            SpecialCommand::ClearLog => "e3470b87-1c5c-49eb-835e-cb0df09d8ad0",
            SpecialCommand::ClearKvp => "33964d99-5486-49d2-9c4e-b0b270430a9b",
            SpecialCommand::ResetIdiotLights => "3dc53134-d52e-43c8-ac26-a9e8064d3ed7",
            SpecialCommand::Unknown => "59e28419-70fc-4bf8-b636-2539323071b3",
        }
    }

    /// Look up a token (case-insensitive); unrecognized tokens map to `Unknown`
    pub fn from_token(token: &str) -> Self {
        Self::lookup(token).unwrap_or(SpecialCommand::Unknown)
    }

    /// Look up a token, returning `None` when it is not in the catalog
    pub fn lookup(token: &str) -> Option<Self> {
        SPECIAL_TOKENS
            .get(token.to_ascii_lowercase().as_str())
            .copied()
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            SpecialCommand::ClearLog => "ClearLog",
            SpecialCommand::ClearKvp => "ClearKVP",
            SpecialCommand::ResetIdiotLights => "ResetIdiotLights",
            SpecialCommand::Unknown => "Unknown",
        }
    }

    /// All special commands
    pub fn all() -> &'static [SpecialCommand] {
        &[
            SpecialCommand::ClearLog,
            SpecialCommand::ClearKvp,
            SpecialCommand::ResetIdiotLights,
            SpecialCommand::Unknown,
        ]
    }
}

impl std::fmt::Display for SpecialCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Idiot-light control operation. Travels as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdiotLightCommand {
    /// Turn the light off
    Disable,
    /// Turn the light on
    Enable,
    /// Set the label
    SetText,
    /// Set the foreground color
    SetFgColor,
    /// Set the background color
    SetBgColor,
    /// Unrecognized operation
    Unknown,
}

impl IdiotLightCommand {
    /// Integer wire value. `Unknown` encodes as -1.
    pub fn code(&self) -> i64 {
        match self {
            IdiotLightCommand::Disable => 0,
            IdiotLightCommand::Enable => 1,
            IdiotLightCommand::SetText => 2,
            IdiotLightCommand::SetFgColor => 3,
            IdiotLightCommand::SetBgColor => 4,
            IdiotLightCommand::Unknown => -1,
        }
    }

    /// Parse an integer wire value
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => IdiotLightCommand::Disable,
            1 => IdiotLightCommand::Enable,
            2 => IdiotLightCommand::SetText,
            3 => IdiotLightCommand::SetFgColor,
            4 => IdiotLightCommand::SetBgColor,
            _ => IdiotLightCommand::Unknown,
        }
    }

    /// Whether the operation carries a `Value` parameter
    pub fn takes_value(&self) -> bool {
        matches!(
            self,
            IdiotLightCommand::SetText | IdiotLightCommand::SetFgColor | IdiotLightCommand::SetBgColor
        )
    }
}
