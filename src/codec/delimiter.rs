//! Outer delimiter selection.
//!
//! A frame's first character is the delimiter used for the rest of the
//! frame. The encoder walks a prioritized candidate list and takes the
//! first character that occurs in none of the parts.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TDDebugError};

/// Candidate delimiters in priority order
pub const DEFAULT_CANDIDATES: &[char] = &[
    ',', ';', '.', '/', ':', '-', '_', '`', '~', '"', '\'', '$', '!', '\\', '§', '¶', '¤', '•',
    '¦', '¬', '°', '±', '×', '÷',
];

/// Used when every candidate collides (ASCII unit separator)
pub const DEFAULT_FALLBACK: char = '\u{1F}';

/// Prioritized delimiter candidates plus a last-resort fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelimiterSet {
    /// Candidates tried in order
    pub candidates: Vec<char>,
    /// Used when every candidate collides
    pub fallback: char,
}

impl Default for DelimiterSet {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATES.to_vec(),
            fallback: DEFAULT_FALLBACK,
        }
    }
}

impl DelimiterSet {
    /// Create with a custom candidate list
    pub fn new(candidates: Vec<char>, fallback: char) -> Self {
        Self {
            candidates,
            fallback,
        }
    }

    /// Pick the first candidate absent from every part.
    ///
    /// `=` is never eligible because it separates keys from values.
    pub fn select<S: AsRef<str>>(&self, parts: &[S]) -> Result<char> {
        let collides = |c: char| parts.iter().any(|p| p.as_ref().contains(c));

        if let Some(c) = self
            .candidates
            .iter()
            .copied()
            .find(|&c| c != '=' && !collides(c))
        {
            return Ok(c);
        }

        if self.fallback != '=' && !collides(self.fallback) {
            tracing::debug!("all delimiter candidates collide, using fallback");
            return Ok(self.fallback);
        }

        Err(TDDebugError::DelimiterExhausted)
    }
}
