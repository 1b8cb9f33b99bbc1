//! TDDebug protocol error types.
//!
//! # Error Classification
//!
//! Errors fall into two groups:
//!
//! - **Local misuse**: the application asked the core to do something that
//!   is not legal right now (request a connection while already connected,
//!   send a frame larger than the transport allows). These are returned as
//!   `Err` to the caller.
//! - **Remote anomalies**: a peer sent something malformed or out of order.
//!   These are logged and the offending message or field is dropped; they
//!   never abort a session. The only remote anomaly that is surfaced as a
//!   value is [`TDDebugError::InvalidValue`], raised when a typed field is
//!   present but cannot be parsed, so the dispatcher can drop exactly that
//!   message.

use thiserror::Error;

/// TDDebug protocol errors.
#[derive(Error, Debug)]
pub enum TDDebugError {
    /// Frame could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A parameter is present but its value does not parse as the expected type.
    #[error("Invalid value for {key}: {value:?} (expected {expected})")]
    InvalidValue {
        /// Parameter name.
        key: String,
        /// Raw value as received.
        value: String,
        /// Expected type, e.g. "bool".
        expected: &'static str,
    },

    /// A required parameter is absent.
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// Every candidate delimiter, including the fallback, occurs in the frame.
    #[error("No delimiter available: every candidate occurs in the payload")]
    DelimiterExhausted,

    /// Protocol-level error caused by local API misuse.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Peer is not known to the transport or session table.
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Frame exceeds the configured size limit.
    #[error("Frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Node event loop has shut down.
    #[error("Node stopped")]
    NodeStopped,

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// TOML parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for TDDebug operations
pub type Result<T> = std::result::Result<T, TDDebugError>;

impl TDDebugError {
    /// Build an [`TDDebugError::InvalidValue`] for a field.
    pub fn invalid_value(key: &str, value: &str, expected: &'static str) -> Self {
        TDDebugError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected,
        }
    }

    /// Whether this error was caused by remote input rather than local misuse.
    pub fn is_remote_anomaly(&self) -> bool {
        matches!(
            self,
            TDDebugError::Decode(_)
                | TDDebugError::InvalidValue { .. }
                | TDDebugError::MissingParameter(_)
        )
    }
}
