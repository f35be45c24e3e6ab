//! Events reported to the operator console.

use causal_relay_core::{ParticipantId, Stamp};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<RelayEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RelayEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Joined {
        id: ParticipantId,
        addr: SocketAddr,
    },
    /// Name already in use; the connection was refused.
    Rejected {
        name: ParticipantId,
        addr: SocketAddr,
    },
    /// First line was not a valid `NAME:` claim.
    Unidentified {
        addr: SocketAddr,
    },
    Chat {
        from: ParticipantId,
        body: String,
        stamp: Stamp,
    },
    FileReceived {
        from: ParticipantId,
        name: String,
        path: PathBuf,
        bytes: u64,
    },
    FileSent {
        to: ParticipantId,
        name: String,
        bytes: u64,
    },
    Left {
        id: ParticipantId,
        /// Set when the session ended on an error rather than a clean close.
        error: Option<String>,
    },
    /// A non-fatal problem inside a session.
    Error {
        id: ParticipantId,
        message: String,
    },
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEvent::Joined { id, addr } => write!(f, "Client {addr} identified as '{id}'"),
            RelayEvent::Rejected { name, .. } => {
                write!(f, "Username '{name}' already taken. Connection rejected.")
            }
            RelayEvent::Unidentified { addr } => write!(
                f,
                "Client {addr} did not properly identify. Connection rejected."
            ),
            RelayEvent::Chat { from, body, .. } => write!(f, "{from}: {body}"),
            RelayEvent::FileReceived {
                from, path, bytes, ..
            } => write!(
                f,
                "Received file: {} from '{from}' ({bytes} bytes)",
                path.display()
            ),
            RelayEvent::FileSent { to, name, .. } => write!(f, "Sent file '{name}' to '{to}'"),
            RelayEvent::Left { id, error: None } => write!(f, "Client '{id}' disconnected"),
            RelayEvent::Left {
                id,
                error: Some(e),
            } => write!(f, "Connection with '{id}' closed: {e}"),
            RelayEvent::Error { id, message } => write!(f, "Error for '{id}': {message}"),
        }
    }
}
