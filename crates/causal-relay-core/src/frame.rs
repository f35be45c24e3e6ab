//! Wire frames.
//!
//! Every frame starts with one `\n`-terminated UTF-8 line:
//!
//! ```text
//! NAME:<id>                     identity claim, first line from a client
//! ERROR: <reason>               claim rejected
//! MSG:<body>:<stamp>            chat message
//! FILE:<name>:<stamp>           file header, raw bytes follow up to ENDOFFILE\n
//! Server shutting down          relay is stopping
//! Server closed the connection  operator disconnected this peer
//! ```
//!
//! The stamp is always the last `:`-separated field and never contains `:`,
//! so bodies and file names may.

use crate::clock::Stamp;
use crate::error::{DecodeError, EncodeError};
use crate::identity::ParticipantId;

/// Terminates a file payload.
pub const SENTINEL: &[u8] = b"ENDOFFILE\n";

/// Read size when streaming a file payload.
pub const CHUNK_SIZE: usize = 65536;

/// Longest header or chat line accepted, terminator included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

pub const SHUTDOWN_NOTICE: &str = "Server shutting down";
pub const CLOSED_NOTICE: &str = "Server closed the connection";

/// Session bootstrap and termination lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Claim(ParticipantId),
    Error(String),
    Shutdown,
    Closed,
}

/// One decoded header line.
///
/// `File` only describes the header; the payload is read separately with
/// [`FrameReader::read_file_body`](crate::FrameReader::read_file_body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Control(Control),
    Chat { body: String, stamp: Stamp },
    File { name: String, stamp: Stamp },
}

impl Frame {
    pub fn chat(body: impl Into<String>, stamp: Stamp) -> Self {
        Frame::Chat {
            body: body.into(),
            stamp,
        }
    }

    pub fn file(name: impl Into<String>, stamp: Stamp) -> Self {
        Frame::File {
            name: name.into(),
            stamp,
        }
    }

    /// Encode the header line, terminator included.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let line = match self {
            Frame::Control(Control::Claim(id)) => format!("NAME:{id}"),
            Frame::Control(Control::Error(reason)) => {
                reject_line_break(reason, "error reason")?;
                format!("ERROR: {reason}")
            }
            Frame::Control(Control::Shutdown) => SHUTDOWN_NOTICE.to_string(),
            Frame::Control(Control::Closed) => CLOSED_NOTICE.to_string(),
            Frame::Chat { body, stamp } => {
                reject_line_break(body, "message body")?;
                format!("MSG:{body}:{stamp}")
            }
            Frame::File { name, stamp } => {
                if name.is_empty() {
                    return Err(EncodeError::EmptyFileName);
                }
                reject_line_break(name, "file name")?;
                format!("FILE:{name}:{stamp}")
            }
        };
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Parse one line with its terminator already removed.
    pub fn parse_line(line: &str) -> Result<Self, DecodeError> {
        if line == SHUTDOWN_NOTICE {
            return Ok(Frame::Control(Control::Shutdown));
        }
        if line == CLOSED_NOTICE {
            return Ok(Frame::Control(Control::Closed));
        }
        if let Some(name) = line.strip_prefix("NAME:") {
            return Ok(Frame::Control(Control::Claim(name.parse()?)));
        }
        if let Some(reason) = line.strip_prefix("ERROR:") {
            return Ok(Frame::Control(Control::Error(reason.trim_start().to_string())));
        }
        if let Some(rest) = line.strip_prefix("MSG:") {
            let (body, stamp) = rest.rsplit_once(':').ok_or(DecodeError::MissingStamp)?;
            return Ok(Frame::chat(body, stamp.parse()?));
        }
        if let Some(rest) = line.strip_prefix("FILE:") {
            let (name, stamp) = rest.rsplit_once(':').ok_or(DecodeError::MissingStamp)?;
            if name.is_empty() {
                return Err(DecodeError::EmptyFileName);
            }
            return Ok(Frame::file(name, stamp.parse()?));
        }
        Err(DecodeError::UnknownTag(line.chars().take(32).collect()))
    }
}

fn reject_line_break(text: &str, field: &'static str) -> Result<(), EncodeError> {
    if text.contains(['\n', '\r']) {
        return Err(EncodeError::LineBreak(field));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(text: &str) -> Stamp {
        text.parse().unwrap()
    }

    fn line(frame: &Frame) -> String {
        String::from_utf8(frame.encode().unwrap()).unwrap()
    }

    #[test]
    fn encodes_wire_lines() {
        let claim = Frame::Control(Control::Claim("alice".parse().unwrap()));
        assert_eq!(line(&claim), "NAME:alice\n");
        assert_eq!(
            line(&Frame::chat("hi", stamp("server=1"))),
            "MSG:hi:server=1\n"
        );
        assert_eq!(
            line(&Frame::file("notes.txt", stamp("alice=3,bob=1"))),
            "FILE:notes.txt:alice=3,bob=1\n"
        );
        assert_eq!(
            line(&Frame::Control(Control::Error("Username already taken".into()))),
            "ERROR: Username already taken\n"
        );
        assert_eq!(
            line(&Frame::Control(Control::Shutdown)),
            "Server shutting down\n"
        );
        assert_eq!(
            line(&Frame::Control(Control::Closed)),
            "Server closed the connection\n"
        );
    }

    #[test]
    fn chat_body_may_contain_colons() {
        let frame = Frame::chat("time: 12:30", stamp("alice=1"));
        let encoded = line(&frame);
        let parsed = Frame::parse_line(encoded.trim_end_matches('\n')).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn parses_every_line_kind() {
        assert_eq!(
            Frame::parse_line("NAME:bob").unwrap(),
            Frame::Control(Control::Claim("bob".parse().unwrap()))
        );
        assert_eq!(
            Frame::parse_line("ERROR: Username already taken").unwrap(),
            Frame::Control(Control::Error("Username already taken".into()))
        );
        assert_eq!(
            Frame::parse_line("MSG:hello:alice=1").unwrap(),
            Frame::chat("hello", stamp("alice=1"))
        );
        assert_eq!(
            Frame::parse_line("FILE:a.bin:").unwrap(),
            Frame::file("a.bin", Stamp::new())
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(matches!(
            Frame::parse_line("PING:1"),
            Err(DecodeError::UnknownTag(_))
        ));
        assert!(matches!(
            Frame::parse_line("MSG:no clock here"),
            Err(DecodeError::MissingStamp)
        ));
        assert!(matches!(
            Frame::parse_line("MSG:hi:{'alice': 1}"),
            Err(DecodeError::Stamp(_))
        ));
        assert!(matches!(
            Frame::parse_line("FILE::alice=1"),
            Err(DecodeError::EmptyFileName)
        ));
        assert!(matches!(
            Frame::parse_line("NAME:"),
            Err(DecodeError::BadClaim(_))
        ));
    }

    #[test]
    fn refuses_to_encode_line_breaks() {
        let frame = Frame::chat("two\nlines", Stamp::new());
        assert!(matches!(
            frame.encode(),
            Err(EncodeError::LineBreak("message body"))
        ));
        assert!(matches!(
            Frame::file("", Stamp::new()).encode(),
            Err(EncodeError::EmptyFileName)
        ));
    }
}
