//! Wire codec for TDDebug frames.
//!
//! Turns a [`Command`] (message type plus ordered `name=value` parameters)
//! into a self-delimiting string and back.
//!
//! # Wire Format
//!
//! ```text
//! ,<TextMessage token>,Message=hello
//! :<TextMessage token>:Message=a, b; c. d/e
//! ```
//!
//! The first character is the delimiter for the rest of the frame. The
//! encoder picks it from a prioritized candidate list (see
//! [`DEFAULT_CANDIDATES`]) so that it never occurs inside any part, which
//! keeps arbitrary payload text round-trippable.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tddebug::codec::{Command, WireCodec};
//! use tddebug::catalog::MessageType;
//!
//! let codec = WireCodec::new();
//! let raw = codec.encode(&Command::new(MessageType::TextMessage).param("Message", "hi"))?;
//! let back = codec.decode(&raw);
//! assert_eq!(back.params.get("Message"), Some("hi"));
//! ```

mod command;
mod delimiter;
mod wire;

pub use command::{Command, Params};
pub use delimiter::{DelimiterSet, DEFAULT_CANDIDATES, DEFAULT_FALLBACK};
pub use wire::{decode, encode, DecodedFrame, WireCodec};
