//! TDDebug session protocol.
//!
//! Two peers negotiate a debugger/debuggee relationship, then exchange
//! typed commands. Commands that expect an answer can travel wrapped with
//! a correlation ID so the reply can be matched whenever it arrives.
//!
//! ## Message Flow
//!
//! ```text
//! Debuggee (A)                      Debugger (B)
//!    |                                |
//!    |--- HandShake RequestConnection -->|  A asks B to debug it
//!    |<-- HandShake ConnectionGranted ---|  or ConnectionRefused
//!    |                                |
//!    |--- VersionInfo --------------->|  A pushes its version
//!    |--- RequestConnectionHeartbeat ->|
//!    |<-- ConnectionHeartbeat --------|
//!    |                                |
//!    |--- LogMessage / KVPData / ... ->|  state reports
//!    |<-- ClientCommandRequest -------|  control
//!    |--- ClientCommandResponse ----->|
//!    |                                |
//!    |--- HandShake ConnectionClose -->|
//!    |<-- HandShake Disconnected -----|
//! ```
//!
//! ## State Machine
//!
//! | State               | Description                       | Valid Transitions              |
//! |---------------------|-----------------------------------|--------------------------------|
//! | `Idle`              | No role established               | → RequestSent, RequestReceived, GrantedAsDebugger |
//! | `RequestSent`       | We asked to be debugged           | → GrantedAsDebuggee, Idle, Disconnected |
//! | `RequestReceived`   | Peer asked; awaiting local choice | → GrantedAsDebugger, Idle, Disconnected |
//! | `GrantedAsDebugger` | We debug the peer                 | → Disconnected                 |
//! | `GrantedAsDebuggee` | The peer debugs us                | → Disconnected                 |
//! | `Disconnected`      | Session over                      | (terminal)                     |
//!
//! Events that are not legal for the current state are logged and ignored.

mod correlator;
mod handshake;
pub mod messages;
mod session;

pub use correlator::{Correlator, CorrelatorStats, PendingRequest, Routing, DEFAULT_PENDING_TTL};
pub use handshake::{AcceptPolicy, Handshake, HandshakeState, Transition};
pub use messages::{
    ClientCommandList, ClientCommandRequest, ClientCommandResult, DebuggerStateChange,
    EchoRequest, HandshakeMessage, Heartbeat, IdiotLightControl, KvpRemove, KvpUpdate, Payload,
    PeerType, PeerTypeInfo, VersionInfo,
};
pub use session::{PeerSession, SessionStats};
