//! Core types for the causal relay.
//!
//! This crate provides the pieces shared by the relay server and its peers:
//! participant names, vector clocks, the line/file wire format, the local
//! file store and operator input. Session logic lives in the server and client crates.

mod clock;
mod codec;
mod error;
mod frame;
mod identity;
mod operator;
mod store;

pub use clock::{MAX_TICK, Stamp, StampParseError, VectorClock};
pub use codec::{FrameReader, FrameWriter};
pub use error::{DecodeError, EncodeError, RelayError};
pub use frame::{
    CHUNK_SIZE, CLOSED_NOTICE, Control, Frame, MAX_LINE_LEN, SENTINEL, SHUTDOWN_NOTICE,
};
pub use identity::{IdentityParseError, MAX_ID_LEN, ParticipantId};
pub use operator::stdin_lines;
pub use store::{FileStore, RECEIVED_PREFIX, wire_name};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, waiting for the `NAME:` claim.
    AwaitingIdentity,
    /// Name claimed, both loops running.
    Active,
    /// Connection torn down.
    Closed,
}
