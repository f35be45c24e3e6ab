//! Error types shared by the relay server and client.

use crate::clock::StampParseError;
use crate::identity::{IdentityParseError, ParticipantId};
use std::io;

/// A frame could not be read off the wire.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
    #[error("stream closed after {0} bytes of an unterminated line")]
    Truncated(usize),
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("line is not valid UTF-8")]
    NotUtf8,
    #[error("unrecognized frame: {0:?}")]
    UnknownTag(String),
    #[error("invalid identity claim: {0}")]
    BadClaim(#[from] IdentityParseError),
    #[error("frame header carries no clock")]
    MissingStamp,
    #[error("corrupt clock payload: {0}")]
    Stamp(#[from] StampParseError),
    #[error("file header has an empty name")]
    EmptyFileName,
    #[error("stream closed after {0} bytes of file payload, before the end marker")]
    UnterminatedFile(u64),
    #[error("writing file payload failed: {0}")]
    Sink(#[source] io::Error),
}

/// A frame could not be written to the wire.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error("{0} contains a line break")]
    LineBreak(&'static str),
    #[error("file name is empty")]
    EmptyFileName,
    #[error("file payload contains the end marker at byte {0}")]
    SentinelInPayload(u64),
    #[error("reading file payload failed: {0}")]
    Source(#[source] io::Error),
}

/// Failure kinds surfaced to the operator.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("username {0} is already taken")]
    IdentityTaken(ParticipantId),
    #[error("protocol error: {0}")]
    ProtocolDecode(#[from] DecodeError),
    #[error("could not send: {0}")]
    Encode(#[from] EncodeError),
    #[error("connection closed")]
    TransportClosed,
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("client {0} not found")]
    TargetUnresolved(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
