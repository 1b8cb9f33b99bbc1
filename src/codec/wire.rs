//! Self-delimiting text frames.
//!
//! ```text
//! <D><token>(<D><name>=<value>)*
//! ```
//!
//! `<D>` is a single character chosen per frame so that it occurs in no
//! part; it is also the frame's first character, which makes decoding
//! self-describing. `=` is the fixed inner separator and is split once, so
//! values may contain `=`.

use super::command::{Command, Params};
use super::delimiter::DelimiterSet;
use crate::catalog::{make_symbolic, MessageType};
use crate::error::{Result, TDDebugError};

/// Parameter names used by the encapsulation wrapper
const ENCAPSULATED_ID: &str = "ID";
const ENCAPSULATED_COMMAND: &str = "Command";

/// Result of decoding one frame, with diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Decoded command (type `Unknown` for unrecognized tokens)
    pub command: Command,
    /// Delimiter found at the head of the frame
    pub delimiter: Option<char>,
    /// Token exactly as received
    pub token: String,
    /// Everything after the token, kept for diagnostics on unknown frames
    pub payload: String,
    /// Parts skipped because they had no `=`
    pub malformed: Vec<String>,
}

impl DecodedFrame {
    /// True if the token was not in the catalog
    pub fn is_unknown(&self) -> bool {
        self.command.message_type == MessageType::Unknown
    }
}

/// Frame encoder/decoder
#[derive(Debug, Clone, Default)]
pub struct WireCodec {
    delimiters: DelimiterSet,
}

impl WireCodec {
    /// Codec with the default delimiter candidates
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec with a custom delimiter set
    pub fn with_delimiters(delimiters: DelimiterSet) -> Self {
        Self { delimiters }
    }

    /// Delimiter set in use
    pub fn delimiters(&self) -> &DelimiterSet {
        &self.delimiters
    }

    /// Encode a command.
    ///
    /// A command carrying a correlation ID is first encoded on its own and
    /// then wrapped in an `IdEncapsulatedCommand`. Parameters with an empty
    /// name or value are omitted.
    pub fn encode(&self, command: &Command) -> Result<String> {
        if let Some(id) = command.correlation_id {
            let inner = Command::with_params(command.message_type, command.params.clone());
            let inner_raw = self.encode(&inner)?;
            let wrapper = Command::new(MessageType::IdEncapsulatedCommand)
                .param(ENCAPSULATED_ID, id.to_string())
                .param(ENCAPSULATED_COMMAND, inner_raw);
            return self.encode(&wrapper);
        }

        self.encode_parts(command.message_type, &command.params)
    }

    /// Encode a type and parameters
    pub fn encode_parts(&self, message_type: MessageType, params: &Params) -> Result<String> {
        let mut parts: Vec<String> = Vec::with_capacity(params.len() + 1);
        parts.push(message_type.token().to_string());

        for (name, value) in params.iter() {
            if name.contains('=') {
                return Err(TDDebugError::Protocol(format!(
                    "parameter name {name:?} contains '='"
                )));
            }
            if name.is_empty() || value.is_empty() {
                continue;
            }
            parts.push(format!("{name}={value}"));
        }

        let delimiter = self.delimiters.select(&parts)?;

        let capacity = parts.iter().map(|p| p.len() + delimiter.len_utf8()).sum();
        let mut out = String::with_capacity(capacity);
        for part in &parts {
            out.push(delimiter);
            out.push_str(part);
        }
        Ok(out)
    }

    /// Decode a frame into a command, discarding diagnostics
    pub fn decode(&self, raw: &str) -> Command {
        self.decode_frame(raw).command
    }

    /// Decode a frame.
    ///
    /// Never fails: an empty frame or unrecognized token yields `Unknown`,
    /// and parts without `=` are skipped and reported in
    /// [`DecodedFrame::malformed`].
    pub fn decode_frame(&self, raw: &str) -> DecodedFrame {
        let mut chars = raw.chars();
        let Some(delimiter) = chars.next() else {
            return DecodedFrame {
                command: Command::new(MessageType::Unknown),
                delimiter: None,
                token: String::new(),
                payload: String::new(),
                malformed: Vec::new(),
            };
        };

        let body = chars.as_str();
        let (token, payload) = match body.find(delimiter) {
            Some(idx) => (&body[..idx], &body[idx + delimiter.len_utf8()..]),
            None => (body, ""),
        };

        let message_type = MessageType::from_token(token);
        if message_type == MessageType::Unknown && MessageType::lookup(token).is_none() {
            tracing::warn!(token = %token, "unrecognized message token");
        }

        let mut params = Params::new();
        let mut malformed = Vec::new();
        if !payload.is_empty() {
            for part in payload.split(delimiter) {
                if part.is_empty() {
                    continue;
                }
                match part.split_once('=') {
                    Some((name, value)) => params.push(name, value),
                    None => {
                        tracing::warn!(
                            part = %part,
                            frame = %make_symbolic(raw),
                            "skipping parameter without '='"
                        );
                        malformed.push(part.to_string());
                    },
                }
            }
        }

        DecodedFrame {
            command: Command::with_params(message_type, params),
            delimiter: Some(delimiter),
            token: token.to_string(),
            payload: payload.to_string(),
            malformed,
        }
    }

    /// Unwrap an `IdEncapsulatedCommand` into its correlation ID and inner frame.
    ///
    /// Returns `Ok(None)` for any other message type.
    pub fn unwrap_encapsulated<'a>(&self, wrapper: &'a Command) -> Result<Option<(uuid::Uuid, &'a str)>> {
        if wrapper.message_type != MessageType::IdEncapsulatedCommand {
            return Ok(None);
        }
        let id = wrapper.params.uuid(ENCAPSULATED_ID)?;
        let inner = wrapper.params.require(ENCAPSULATED_COMMAND)?;
        Ok(Some((id, inner)))
    }
}

/// Encode with the default delimiter set
pub fn encode(command: &Command) -> Result<String> {
    WireCodec::new().encode(command)
}

/// Decode with the default delimiter set
pub fn decode(raw: &str) -> Command {
    WireCodec::new().decode(raw)
}
