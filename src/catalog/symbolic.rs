//! Debug rendering of raw frames with tokens replaced by names.
//!
//! Output of [`make_symbolic`] is for logs only. It is not a valid frame.

use lazy_static::lazy_static;
use regex::Regex;

use super::{HandshakeCommand, MessageType, SpecialCommand};

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(
        r"[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}"
    )
    .expect("token regex is valid");
}

/// Name a catalog token, if it is one
pub fn token_name(token: &str) -> Option<&'static str> {
    if let Some(ty) = MessageType::lookup(token) {
        return Some(ty.name());
    }
    if let Some(cmd) = HandshakeCommand::lookup(token) {
        return Some(cmd.name());
    }
    SpecialCommand::lookup(token).map(|c| c.name())
}

/// Replace every catalog token in `raw` with `<Name>`.
///
/// UUID-shaped values that are not catalog tokens (KVP ids, correlation ids)
/// are left untouched.
pub fn make_symbolic(raw: &str) -> String {
    TOKEN_RE
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let token = &caps[0];
            match token_name(token) {
                Some(name) => format!("<{name}>"),
                None => token.to_string(),
            }
        })
        .into_owned()
}
