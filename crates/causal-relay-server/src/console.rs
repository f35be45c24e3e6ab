//! Operator console.
//!
//! Commands typed by the operator are parsed into [`Command`]s and run against
//! the dispatcher; replies and session events go to the console's writer.

use crate::dispatcher::{Delivery, Dispatcher, Targets};
use crate::event::EventReceiver;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

pub const MENU: &str = "\
Commands:
  list                        show connected clients
  msg <names|all> <text>      send a message
  file <names|all> <path>     send a file
  kick <name>                 disconnect a client
  exit                        notify clients and shut down
  help                        show this menu
Names are separated by commas.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Msg { targets: Targets, text: String },
    File { targets: Targets, path: String },
    Kick(String),
    Exit,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid option")]
    Invalid,
    #[error("Usage: {0}")]
    Usage(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map(|(verb, rest)| (verb, rest.trim_start()))
            .unwrap_or((line, ""));

        match verb.to_ascii_lowercase().as_str() {
            "list" => Ok(Command::List),
            "exit" => Ok(Command::Exit),
            "help" => Ok(Command::Help),
            "msg" => {
                let (targets, text) = split_targets(rest)
                    .ok_or(CommandError::Usage("msg <names|all> <text>"))?;
                Ok(Command::Msg {
                    targets,
                    text: text.to_string(),
                })
            }
            "file" => {
                let (targets, path) = split_targets(rest)
                    .ok_or(CommandError::Usage("file <names|all> <path>"))?;
                Ok(Command::File {
                    targets,
                    path: path.to_string(),
                })
            }
            "kick" if !rest.is_empty() => Ok(Command::Kick(rest.to_string())),
            "kick" => Err(CommandError::Usage("kick <name>")),
            _ => Err(CommandError::Invalid),
        }
    }
}

fn split_targets(rest: &str) -> Option<(Targets, &str)> {
    let (targets, tail) = rest.split_once(char::is_whitespace)?;
    let tail = tail.trim();
    if tail.is_empty() {
        return None;
    }
    Some((Targets::parse(targets), tail))
}

/// Whether the console should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Console<W> {
    dispatcher: Arc<Dispatcher>,
    out: W,
}

impl<W: AsyncWrite + Unpin> Console<W> {
    pub fn new(dispatcher: Arc<Dispatcher>, out: W) -> Self {
        Self { dispatcher, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Read commands until `exit` or end of input.
    ///
    /// End of input only stops the console; clients stay connected.
    pub async fn run(mut self, mut lines: mpsc::Receiver<String>) -> io::Result<()> {
        self.say(MENU).await?;
        while let Some(line) = lines.recv().await {
            if self.handle_line(&line).await? == Flow::Exit {
                return Ok(());
            }
        }
        tracing::info!("operator input closed, still serving");
        Ok(())
    }

    pub async fn handle_line(&mut self, line: &str) -> io::Result<Flow> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }
        match line.parse::<Command>() {
            Ok(command) => self.execute(command).await,
            Err(e) => {
                self.say(&e.to_string()).await?;
                Ok(Flow::Continue)
            }
        }
    }

    pub async fn execute(&mut self, command: Command) -> io::Result<Flow> {
        match command {
            Command::Help => self.say(MENU).await?,
            Command::List => {
                let names = self.dispatcher.registry().list().await;
                if names.is_empty() {
                    self.say("No clients connected.").await?;
                } else {
                    let mut text = String::from("Connected clients:");
                    for (n, name) in names.iter().enumerate() {
                        text.push_str(&format!("\n{}. {name}", n + 1));
                    }
                    self.say(&text).await?;
                }
            }
            Command::Msg { targets, text } => {
                match self.dispatcher.send_message(&text, &targets).await {
                    Ok(delivery) => self.report(&delivery, "Message sent").await?,
                    Err(e) => self.say(&format!("Error: {e}")).await?,
                }
            }
            Command::File { targets, path } => {
                match self.dispatcher.send_file(&path, &targets).await {
                    Ok(delivery) => {
                        self.report(&delivery, &format!("Sending '{path}'")).await?
                    }
                    Err(e) => self.say(&format!("Error: {e}")).await?,
                }
            }
            Command::Kick(name) => match self.dispatcher.disconnect(&name).await {
                Ok(()) => self.say(&format!("Disconnected '{name}'")).await?,
                Err(e) => self.say(&format!("Error: {e}")).await?,
            },
            Command::Exit => {
                let notified = self.dispatcher.shutdown_all().await;
                self.say(&format!("Shutting down, notified {notified} client(s)"))
                    .await?;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    async fn report(&mut self, delivery: &Delivery, what: &str) -> io::Result<()> {
        for name in &delivery.unresolved {
            self.say(&format!("Client '{name}' not found.")).await?;
        }
        for id in &delivery.failed {
            self.say(&format!("Could not reach '{id}'")).await?;
        }
        if delivery.delivered.is_empty() {
            if delivery.failed.is_empty() {
                self.say("No valid clients selected.").await?;
            }
            return Ok(());
        }
        let names: Vec<&str> = delivery.delivered.iter().map(|id| id.as_str()).collect();
        self.say(&format!("{what} to {}", names.join(", "))).await
    }

    async fn say(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await
    }
}

/// Print session events until every sender is gone.
pub async fn print_events<W>(mut events: EventReceiver, mut out: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.recv().await {
        out.write_all(format!("{event}\n").as_bytes()).await?;
        out.flush().await?;
    }
    Ok(())
}
