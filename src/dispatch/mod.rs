//! Message dispatch.
//!
//! [`Dispatcher`] owns one [`PeerSession`](crate::protocol::PeerSession)
//! per connected peer, the pending-request correlator and the codec. Every
//! inbound frame is decoded, checked against the negotiated roles and
//! routed to the matching [`Handlers`] callback; protocol-level replies
//! (handshake answers, heartbeats, echo, client command results) are
//! produced as [`Outbound`] frames.

mod dispatcher;
mod handlers;

pub use dispatcher::{Dispatcher, Outbound, Target};
pub use handlers::{Context, Correlation, Event, Handlers, LoggingHandlers, RecordingHandlers};
