//! # TDDebug - Peer-to-Peer Debug Messaging
//!
//! A running program (the debuggee) reports its state to one or more
//! monitoring tools (debuggers) over a symmetric peer-to-peer link: log
//! lines, key-value pairs, status lights and text. Debuggers can in turn
//! ask the debuggee to run named client commands.
//!
//! ## Features
//!
//! - **Self-delimiting wire format**: every frame picks its own delimiter,
//!   so payloads never need escaping
//! - **Role negotiation**: a handshake decides who debugs whom
//! - **Correlation**: request/response pairs matched by ID, in any order
//! - **Pluggable transports**: in-process hub for tests, TCP for real use
//!
//! ## Protocol Overview
//!
//! ### Architecture
//!
//! ```text
//! Debuggee                        Transport                      Debugger
//!    |                                |                              |
//!    |--- HandShake RequestConnection --------------------------->  |
//!    |<-- HandShake ConnectionGranted -----------------------------  |
//!    |                                |                              |
//!    |--- LogMessage / KVPData / ControlIdiotLight -------------->  |
//!    |<-- ClientCommandRequest (ID-encapsulated) ------------------  |
//!    |--- ClientCommandResponse (same ID) ----------------------->  |
//!    |                                |                              |
//!    |--- HandShake ConnectionClose ----------------------------->  |
//!    |<-- HandShake Disconnected ----------------------------------  |
//! ```
//!
//! ### Wire Format
//!
//! ```text
//! <D><token>(<D><name>=<value>)*
//! ```
//!
//! | Part      | Meaning                                                  |
//! |-----------|----------------------------------------------------------|
//! | `<D>`     | Delimiter, chosen per frame from a candidate list        |
//! | `<token>` | UUID identifying the message type                        |
//! | `name=value` | Parameters; `=` splits once so values may contain `=` |
//!
//! ## Quick Start
//!
//! ### Codec Only
//!
//! ```rust
//! use tddebug::catalog::MessageType;
//! use tddebug::codec::{decode, encode, Command};
//!
//! let cmd = Command::new(MessageType::LogMessage).param("Message", "a,b;c");
//! let frame = encode(&cmd).unwrap();
//! assert_eq!(decode(&frame), cmd);
//! ```
//!
//! ### Running a Node
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tddebug::{Config, LoggingHandlers, Node, TcpTransport};
//! use tddebug::transport::event_channel;
//!
//! let (tx, rx) = event_channel();
//! let transport = TcpTransport::new(tx);
//! let peer = transport.connect("127.0.0.1:7373".parse()?).await?;
//! let node = Node::spawn(Config::default(), Arc::new(transport), rx, LoggingHandlers);
//! node.request_connection(&peer).await?;
//! node.send_log(&peer, "hello").await?;
//! ```
//!
//! ## Modules
//!
//! - [`catalog`]: Message type tokens and sub-command vocabularies
//! - [`codec`]: Frame encoding and decoding
//! - [`protocol`]: Handshake, correlation and typed payloads
//! - [`dispatch`]: Routing decoded frames to application handlers
//! - [`node`]: Tokio event loop tying dispatch to a transport
//! - [`transport`]: Peer transports (in-memory, TCP)
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod catalog;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod node;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use catalog::{HandshakeCommand, IdiotLightCommand, MessageType, SpecialCommand};
pub use codec::{Command, Params, WireCodec};
pub use config::Config;
pub use dispatch::{Dispatcher, Handlers, LoggingHandlers, Outbound, Target};
pub use error::{Result, TDDebugError};
pub use node::{Node, NodeHandle};
pub use protocol::{AcceptPolicy, Correlator, Handshake, HandshakeState, PeerSession};
pub use transport::{MemoryNetwork, PeerId, TcpTransport, Transport, TransportEvent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol version announced in `VersionInfo`
pub const PROTOCOL_VERSION: &str = "1.0";
