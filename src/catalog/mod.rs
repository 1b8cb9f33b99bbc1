//! Command catalog: the closed set of identifiers that appear on the wire.
//!
//! Every message type and sub-command maps to one stable, UUID-shaped token.
//! The mapping is a bijection and is fixed at compile time; decoding an
//! unrecognized token yields the `Unknown` variant rather than an error.
//!
//! | Table                | Carried in                       |
//! |----------------------|----------------------------------|
//! | [`MessageType`]      | first part of every frame        |
//! | [`HandshakeCommand`] | `Command=` of a `HandShake`      |
//! | [`SpecialCommand`]   | `Command=` of a `SpecialCommand` |
//! | [`IdiotLightCommand`]| `Command=` of a `ControlIdiotLight` (integer) |

mod message_type;
mod subcommands;
mod symbolic;

pub use message_type::MessageType;
pub use subcommands::{HandshakeCommand, IdiotLightCommand, SpecialCommand};
pub use symbolic::{make_symbolic, token_name};
