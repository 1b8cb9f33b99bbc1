//! Debugger/debuggee role negotiation.
//!
//! One [`Handshake`] exists per peer link. Remote handshake sub-commands go
//! through [`Handshake::transition_to`], which is total: every
//! `(state, event)` pair yields a [`Transition`], and pairs that are not
//! legal leave the state unchanged and are logged. Local actions
//! (requesting a connection, closing) return `Err` when the current state
//! does not allow them.

use serde::{Deserialize, Serialize};

use crate::catalog::HandshakeCommand;
use crate::error::{Result, TDDebugError};

/// Handshake state for one peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakeState {
    /// No role established
    Idle,
    /// We asked the peer to become its debuggee
    RequestSent,
    /// The peer asked to become our debuggee; awaiting a local decision
    RequestReceived,
    /// We are the debugger for this peer
    GrantedAsDebugger,
    /// We are the debuggee of this peer
    GrantedAsDebuggee,
    /// Session over (terminal)
    Disconnected,
}

impl HandshakeState {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeState::Idle => "Idle",
            HandshakeState::RequestSent => "RequestSent",
            HandshakeState::RequestReceived => "RequestReceived",
            HandshakeState::GrantedAsDebugger => "GrantedAsDebugger",
            HandshakeState::GrantedAsDebuggee => "GrantedAsDebuggee",
            HandshakeState::Disconnected => "Disconnected",
        }
    }

    /// States in which the link has left `Idle` and not yet ended
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            HandshakeState::RequestSent
                | HandshakeState::RequestReceived
                | HandshakeState::GrantedAsDebugger
                | HandshakeState::GrantedAsDebuggee
        )
    }

    /// All states
    pub fn all() -> &'static [HandshakeState] {
        &[
            HandshakeState::Idle,
            HandshakeState::RequestSent,
            HandshakeState::RequestReceived,
            HandshakeState::GrantedAsDebugger,
            HandshakeState::GrantedAsDebuggee,
            HandshakeState::Disconnected,
        ]
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How this instance answers a `RequestConnection`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptPolicy {
    /// Willing debugger: grant immediately
    Grant,
    /// Never act as debugger
    #[default]
    Refuse,
    /// Park the request in `RequestReceived` until the application decides
    Manual,
}

impl std::str::FromStr for AcceptPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grant" | "debugger" | "yes" => Ok(Self::Grant),
            "refuse" | "no" => Ok(Self::Refuse),
            "manual" | "ask" => Ok(Self::Manual),
            _ => Err(format!("Unknown accept policy: {s}")),
        }
    }
}

/// Result of feeding one remote event to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Event received
    pub event: HandshakeCommand,
    /// State before
    pub from: HandshakeState,
    /// State after
    pub to: HandshakeState,
    /// Sub-command to send back, if any
    pub reply: Option<HandshakeCommand>,
    /// False when the event was not legal for `from` and was ignored
    pub applied: bool,
}

impl Transition {
    /// Whether the state changed
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Per-link handshake state machine
#[derive(Debug, Clone)]
pub struct Handshake {
    state: HandshakeState,
    policy: AcceptPolicy,
    initiated_close: bool,
}

impl Handshake {
    /// New machine in `Idle`
    pub fn new(policy: AcceptPolicy) -> Self {
        Self {
            state: HandshakeState::Idle,
            policy,
            initiated_close: false,
        }
    }

    /// Current state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Answering policy
    pub fn policy(&self) -> AcceptPolicy {
        self.policy
    }

    /// True once we act as this peer's debugger
    pub fn is_debugger(&self) -> bool {
        self.state == HandshakeState::GrantedAsDebugger
    }

    /// True once we act as this peer's debuggee
    pub fn is_debuggee(&self) -> bool {
        self.state == HandshakeState::GrantedAsDebuggee
    }

    /// True if we sent the close that ended this link
    pub fn initiated_close(&self) -> bool {
        self.initiated_close
    }

    /// Ask the peer to act as our debugger. Returns the sub-command to send.
    pub fn request_connection(&mut self) -> Result<HandshakeCommand> {
        self.expect_state(HandshakeState::Idle, "request a connection")?;
        self.set_state(HandshakeState::RequestSent);
        Ok(HandshakeCommand::RequestConnection)
    }

    /// Grant a parked request (manual policy)
    pub fn grant(&mut self) -> Result<HandshakeCommand> {
        self.expect_state(HandshakeState::RequestReceived, "grant a connection")?;
        self.set_state(HandshakeState::GrantedAsDebugger);
        Ok(HandshakeCommand::ConnectionGranted)
    }

    /// Refuse a parked request (manual policy)
    pub fn refuse(&mut self) -> Result<HandshakeCommand> {
        self.expect_state(HandshakeState::RequestReceived, "refuse a connection")?;
        self.set_state(HandshakeState::Idle);
        Ok(HandshakeCommand::ConnectionRefused)
    }

    /// Close the session from our side
    pub fn close(&mut self) -> Result<HandshakeCommand> {
        if !self.state.is_active() {
            return Err(TDDebugError::Protocol(format!(
                "Cannot close connection in state {}",
                self.state
            )));
        }
        self.initiated_close = true;
        self.set_state(HandshakeState::Disconnected);
        Ok(HandshakeCommand::ConnectionClose)
    }

    /// Drop our debuggee (debugger side only)
    pub fn drop_client(&mut self) -> Result<HandshakeCommand> {
        self.expect_state(HandshakeState::GrantedAsDebugger, "drop a client")?;
        self.initiated_close = true;
        self.set_state(HandshakeState::Disconnected);
        Ok(HandshakeCommand::DropAsClient)
    }

    /// The transport lost the peer; no reply is possible
    pub fn peer_lost(&mut self) {
        if self.state != HandshakeState::Disconnected {
            self.set_state(HandshakeState::Disconnected);
        }
    }

    /// Apply a remote handshake sub-command.
    pub fn transition_to(&mut self, event: HandshakeCommand) -> Transition {
        use HandshakeCommand as Ev;
        use HandshakeState as St;

        let from = self.state;
        let outcome: Option<(St, Option<Ev>)> = match (from, event) {
            (_, Ev::Unknown) => None,

            (St::Idle, Ev::RequestConnection) => Some(match self.policy {
                AcceptPolicy::Grant => (St::GrantedAsDebugger, Some(Ev::ConnectionGranted)),
                AcceptPolicy::Refuse => (St::Idle, Some(Ev::ConnectionRefused)),
                AcceptPolicy::Manual => (St::RequestReceived, None),
            }),
            // Debuggee retried; our grant may have been lost
            (St::GrantedAsDebugger, Ev::RequestConnection) => {
                Some((St::GrantedAsDebugger, Some(Ev::ConnectionGranted)))
            },

            (St::RequestSent, Ev::ConnectionGranted) => Some((St::GrantedAsDebuggee, None)),
            (St::RequestSent, Ev::ConnectionRefused) => Some((St::Idle, None)),

            (St::GrantedAsDebuggee, Ev::DropAsClient) => Some((St::Disconnected, None)),

            (s, Ev::ConnectionClose | Ev::Disconnected) if s.is_active() => {
                Some((St::Disconnected, Some(Ev::Disconnected)))
            },

            _ => None,
        };

        match outcome {
            Some((to, reply)) => {
                if to != from {
                    self.set_state(to);
                }
                tracing::info!(
                    event = %event,
                    from = %from,
                    to = %to,
                    reply = ?reply.map(|r| r.name()),
                    "handshake transition"
                );
                Transition {
                    event,
                    from,
                    to,
                    reply,
                    applied: true,
                }
            },
            None => {
                if event == Ev::Disconnected && from == St::Disconnected && self.initiated_close {
                    tracing::debug!("peer acknowledged our close");
                } else if event == Ev::Unknown {
                    tracing::warn!(state = %from, "unknown handshake sub-command");
                } else if event == Ev::RequestConnection && from == St::RequestSent {
                    // Both sides asked to be debugged; neither will grant
                    tracing::warn!(
                        "crossed connection requests, staying in RequestSent; close and retry to recover"
                    );
                } else {
                    tracing::warn!(
                        event = %event,
                        state = %from,
                        "ignoring handshake event not legal in this state"
                    );
                }
                Transition {
                    event,
                    from,
                    to: from,
                    reply: None,
                    applied: false,
                }
            },
        }
    }

    fn expect_state(&self, expected: HandshakeState, action: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TDDebugError::Protocol(format!(
                "Cannot {action} in state {}",
                self.state
            )))
        }
    }

    fn set_state(&mut self, state: HandshakeState) {
        self.state = state;
    }

    #[cfg(test)]
    pub(crate) fn in_state(policy: AcceptPolicy, state: HandshakeState) -> Self {
        Self {
            state,
            policy,
            initiated_close: false,
        }
    }
}
