//! Typed input and printed output for an interactive client.

use crate::session::ClientEvent;
use std::io;
use std::str::FromStr;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

pub const HELP: &str =
    "Type a message and press enter. /file <path> sends a file, /quit (or exit) leaves.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Say(String),
    SendFile(String),
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientCommandError {
    #[error("nothing to send")]
    Empty,
    #[error("Usage: /file <path>")]
    MissingPath,
}

impl FromStr for ClientCommand {
    type Err = ClientCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(ClientCommandError::Empty);
        }
        if trimmed == "/quit" || trimmed.eq_ignore_ascii_case("exit") {
            return Ok(ClientCommand::Quit);
        }
        if trimmed == "/file" {
            return Err(ClientCommandError::MissingPath);
        }
        if let Some(path) = trimmed.strip_prefix("/file ") {
            let path = path.trim();
            if path.is_empty() {
                return Err(ClientCommandError::MissingPath);
            }
            return Ok(ClientCommand::SendFile(path.to_string()));
        }
        Ok(ClientCommand::Say(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Turn typed lines into commands for the session.
///
/// Stops after `Quit`, at end of input, or once the session stops listening.
/// End of input counts as quitting.
pub async fn forward_commands<W>(
    mut lines: mpsc::Receiver<String>,
    commands: mpsc::Sender<ClientCommand>,
    mut out: W,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        let command = match line.parse::<ClientCommand>() {
            Ok(command) => command,
            Err(ClientCommandError::Empty) => continue,
            Err(e) => {
                out.write_all(format!("{e}\n").as_bytes()).await?;
                out.flush().await?;
                continue;
            }
        };
        let quit = command == ClientCommand::Quit;
        if commands.send(command).await.is_err() || quit {
            return Ok(());
        }
    }
    let _ = commands.send(ClientCommand::Quit).await;
    Ok(())
}

pub async fn print_events<W>(
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    mut out: W,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.recv().await {
        out.write_all(format!("{event}\n").as_bytes()).await?;
        out.flush().await?;
    }
    Ok(())
}
