//! Causal relay client.
//!
//! Connects to a relay, claims a username and then chats and exchanges files
//! with the server operator. Every outgoing event advances the client's own
//! entry in its vector clock; every incoming stamp is merged into it.

pub mod config;
pub mod console;
pub mod session;

use anyhow::Context;
use causal_relay_core::{FileStore, ParticipantId, stdin_lines};
use config::ClientConfig;
use console::{HELP, forward_commands, print_events};
use session::ClientSession;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Connect and run an interactive session on stdin/stdout.
pub async fn run(config: ClientConfig) -> anyhow::Result<()> {
    let mut out = tokio::io::stdout();
    let mut lines = stdin_lines();

    let stream = TcpStream::connect((config.host.as_str(), config.port))
        .await
        .with_context(|| {
            format!(
                "could not connect to server at {}:{}",
                config.host, config.port
            )
        })?;
    stream.set_nodelay(true)?;
    say(&mut out, &format!("Connected to {}:{}", config.host, config.port)).await?;

    let name = match config.name {
        Some(name) => name,
        None => prompt_name(&mut lines, &mut out).await?,
    };
    say(&mut out, HELP).await?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(events_rx, tokio::io::stdout()));
    let (commands_tx, commands_rx) = mpsc::channel(16);
    let input = tokio::spawn(forward_commands(lines, commands_tx, tokio::io::stdout()));

    let mut session = ClientSession::new(name, FileStore::new(&config.files_dir), events_tx);
    let result = session.run(stream, commands_rx).await;
    tracing::debug!(clock = %session.clock().await, "session over");

    input.abort();
    // The session holds the last event sender.
    drop(session);
    if let Ok(Err(e)) = printer.await {
        tracing::warn!("console output failed: {e}");
    }

    let ending = result?;
    say(&mut out, &ending.to_string()).await?;
    Ok(())
}

async fn prompt_name<W>(
    lines: &mut mpsc::Receiver<String>,
    out: &mut W,
) -> anyhow::Result<ParticipantId>
where
    W: AsyncWrite + Unpin,
{
    loop {
        out.write_all(b"Enter your username: ").await?;
        out.flush().await?;
        let line = lines
            .recv()
            .await
            .context("input closed before a username was given")?;
        match line.trim().parse::<ParticipantId>() {
            Ok(name) => return Ok(name),
            Err(e) => say(out, &format!("Invalid username: {e}")).await?,
        }
    }
}

async fn say<W>(out: &mut W, text: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(text.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}
