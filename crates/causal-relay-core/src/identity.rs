//! Participant identity.
//!
//! A participant is named by a short token chosen by the operator of a peer
//! (or by the relay itself for its own clock). The token is used verbatim on
//! the wire, so it may not contain any byte that delimits a frame field:
//! `:` separates header fields, `=` and `,` separate clock entries, and
//! whitespace would break the line format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a participant name, in bytes.
pub const MAX_ID_LEN: usize = 64;

/// A validated participant name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Validate and wrap a participant name.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentityParseError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdentityParseError::Empty);
        }
        if name.len() > MAX_ID_LEN {
            return Err(IdentityParseError::TooLong(name.len()));
        }
        if let Some(c) = name
            .chars()
            .find(|c| matches!(c, ':' | '=' | ',') || c.is_whitespace() || c.is_control())
        {
            return Err(IdentityParseError::ReservedChar(c));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = IdentityParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

impl AsRef<str> for ParticipantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Error parsing a participant name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityParseError {
    #[error("participant name cannot be empty")]
    Empty,
    #[error("participant name is {0} bytes, limit is {MAX_ID_LEN}")]
    TooLong(usize),
    #[error("participant name contains reserved character {0:?}")]
    ReservedChar(char),
}
