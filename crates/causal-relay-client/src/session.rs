//! Client side of a relay connection.

use crate::console::ClientCommand;
use causal_relay_core::{
    CLOSED_NOTICE, Control, FileStore, Frame, FrameReader, FrameWriter, ParticipantId, RelayError,
    SHUTDOWN_NOTICE, SessionState, Stamp, VectorClock, wire_name,
};
use std::fmt;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};

/// Things the user should see while connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message {
        body: String,
        stamp: Stamp,
    },
    FileReceived {
        name: String,
        path: PathBuf,
        bytes: u64,
    },
    FileSent {
        name: String,
        bytes: u64,
    },
    Error(String),
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::Message { body, .. } => write!(f, "Server: {body}"),
            ClientEvent::FileReceived { path, bytes, .. } => {
                write!(f, "Received file: {} ({bytes} bytes)", path.display())
            }
            ClientEvent::FileSent { name, .. } => write!(f, "Sent file: {name}"),
            ClientEvent::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ending {
    /// The user left.
    Quit,
    /// The server answered the claim with `ERROR:`.
    Rejected(String),
    ServerShutdown,
    /// Disconnected by the server operator.
    Kicked,
    ConnectionLost,
}

impl fmt::Display for Ending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ending::Quit => f.write_str("Connection closed"),
            Ending::Rejected(reason) => write!(f, "Server Error: {reason}"),
            Ending::ServerShutdown => f.write_str(SHUTDOWN_NOTICE),
            Ending::Kicked => f.write_str(CLOSED_NOTICE),
            Ending::ConnectionLost => f.write_str("Connection closed by server"),
        }
    }
}

pub struct ClientSession {
    id: ParticipantId,
    clock: Mutex<VectorClock>,
    /// Last stamp the relay sent; each one should dominate the one before.
    last_seen: Mutex<Option<Stamp>>,
    store: FileStore,
    events: mpsc::UnboundedSender<ClientEvent>,
    state: SessionState,
}

impl ClientSession {
    pub fn new(
        id: ParticipantId,
        store: FileStore,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            clock: Mutex::new(VectorClock::new(id.clone())),
            last_seen: Mutex::new(None),
            id,
            store,
            events,
            state: SessionState::AwaitingIdentity,
        }
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn clock(&self) -> Stamp {
        self.clock.lock().await.snapshot()
    }

    /// Claim the name, then relay commands out and events in until one side stops.
    pub async fn run<S>(
        &mut self,
        stream: S,
        commands: mpsc::Receiver<ClientCommand>,
    ) -> Result<Ending, RelayError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read, write) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read);
        let mut writer = FrameWriter::new(write);

        writer
            .write_frame(&Frame::Control(Control::Claim(self.id.clone())))
            .await?;
        self.state = SessionState::Active;
        tracing::debug!(participant = %self.id, "claim sent");

        let this = &*self;
        let ending = tokio::select! {
            r = this.inbound(&mut reader) => r,
            r = this.outbound(&mut writer, commands) => r,
        };

        self.state = SessionState::Closed;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("shutdown after session end failed: {e}");
        }
        ending
    }

    async fn inbound<R>(&self, reader: &mut FrameReader<R>) -> Result<Ending, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let Some(frame) = reader.next_frame().await? else {
                return Ok(Ending::ConnectionLost);
            };
            match frame {
                Frame::Chat { body, stamp } => {
                    self.observe(&stamp).await;
                    self.report(ClientEvent::Message { body, stamp });
                }
                Frame::File { name, stamp } => {
                    tracing::info!(file = %name, "receiving file");
                    match self.store.open_for_write(&name).await {
                        Ok((mut file, path)) => {
                            let bytes = reader.read_file_body(&mut file).await?;
                            self.report(ClientEvent::FileReceived { name, path, bytes });
                        }
                        Err(e) => {
                            reader.read_file_body(&mut tokio::io::sink()).await?;
                            self.report(ClientEvent::Error(format!(
                                "could not store '{name}': {e}"
                            )));
                        }
                    }
                    self.observe(&stamp).await;
                }
                Frame::Control(Control::Error(reason)) => return Ok(Ending::Rejected(reason)),
                Frame::Control(Control::Shutdown) => return Ok(Ending::ServerShutdown),
                Frame::Control(Control::Closed) => return Ok(Ending::Kicked),
                Frame::Control(Control::Claim(id)) => {
                    tracing::debug!(participant = %id, "ignoring claim from server");
                }
            }
        }
    }

    async fn outbound<W>(
        &self,
        writer: &mut FrameWriter<W>,
        mut commands: mpsc::Receiver<ClientCommand>,
    ) -> Result<Ending, RelayError>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(command) = commands.recv().await {
            match command {
                ClientCommand::Say(text) => {
                    let stamp = self.tick().await;
                    writer.write_frame(&Frame::chat(text, stamp)).await?;
                }
                ClientCommand::SendFile(path) => {
                    let Some(name) = wire_name(&path) else {
                        self.report(ClientEvent::Error(format!("not a file name: {path}")));
                        continue;
                    };
                    let mut file = match self.store.open_for_read(&path).await {
                        Ok(file) => file,
                        Err(e) => {
                            self.report(ClientEvent::Error(e.to_string()));
                            continue;
                        }
                    };
                    let stamp = self.tick().await;
                    let bytes = writer.write_file(name, &stamp, &mut file).await?;
                    self.report(ClientEvent::FileSent {
                        name: name.to_string(),
                        bytes,
                    });
                }
                ClientCommand::Quit => return Ok(Ending::Quit),
            }
        }
        Ok(Ending::Quit)
    }

    async fn tick(&self) -> Stamp {
        let mut clock = self.clock.lock().await;
        clock.increment();
        clock.snapshot()
    }

    async fn observe(&self, stamp: &Stamp) {
        let mut last = self.last_seen.lock().await;
        if let Some(previous) = last.as_ref() {
            if !previous.happened_before(stamp) {
                tracing::warn!(
                    %previous,
                    received = %stamp,
                    "relay event does not follow the previous one, delivered out of order"
                );
            }
        }
        *last = Some(stamp.clone());
        self.clock.lock().await.merge(stamp);
    }

    fn report(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causal_relay_core::SENTINEL;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex};
    use tokio::task::JoinHandle;

    struct Peer {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    struct Running {
        task: JoinHandle<(ClientSession, Result<Ending, RelayError>)>,
        commands: mpsc::Sender<ClientCommand>,
        events: mpsc::UnboundedReceiver<ClientEvent>,
        server: Peer,
    }

    fn start(name: &str, dir: &std::path::Path) -> Running {
        let (client_side, server_side) = duplex(256 * 1024);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands, commands_rx) = mpsc::channel(8);
        let mut session =
            ClientSession::new(name.parse().unwrap(), FileStore::new(dir), events_tx);
        let task = tokio::spawn(async move {
            let result = session.run(client_side, commands_rx).await;
            (session, result)
        });
        let (r, w) = tokio::io::split(server_side);
        Running {
            task,
            commands,
            events,
            server: Peer {
                reader: FrameReader::new(r),
                writer: FrameWriter::new(w),
            },
        }
    }

    fn stamp(text: &str) -> Stamp {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn claims_then_stamps_each_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = start("alice", dir.path());

        assert_eq!(
            c.server.reader.next_frame().await.unwrap(),
            Some(Frame::Control(Control::Claim("alice".parse().unwrap())))
        );
        c.commands.send(ClientCommand::Say("hello".into())).await.unwrap();
        c.commands.send(ClientCommand::Say("again".into())).await.unwrap();
        assert_eq!(
            c.server.reader.next_frame().await.unwrap(),
            Some(Frame::chat("hello", stamp("alice=1")))
        );
        assert_eq!(
            c.server.reader.next_frame().await.unwrap(),
            Some(Frame::chat("again", stamp("alice=2")))
        );

        c.commands.send(ClientCommand::Quit).await.unwrap();
        let (session, result) = c.task.await.unwrap();
        assert_eq!(result.unwrap(), Ending::Quit);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(c.server.reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn merges_relay_stamps() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = start("bob", dir.path());
        c.server.reader.next_frame().await.unwrap();

        c.server
            .writer
            .write_frame(&Frame::chat("hi", stamp("alice=2,server=1")))
            .await
            .unwrap();
        assert_eq!(
            c.events.recv().await,
            Some(ClientEvent::Message {
                body: "hi".into(),
                stamp: stamp("alice=2,server=1"),
            })
        );

        c.commands.send(ClientCommand::Say("ack".into())).await.unwrap();
        assert_eq!(
            c.server.reader.next_frame().await.unwrap(),
            Some(Frame::chat("ack", stamp("alice=2,bob=1,server=1")))
        );

        c.server
            .writer
            .write_frame(&Frame::Control(Control::Shutdown))
            .await
            .unwrap();
        let (session, result) = c.task.await.unwrap();
        assert_eq!(result.unwrap(), Ending::ServerShutdown);
        assert_eq!(session.clock().await, stamp("alice=2,bob=1,server=1"));
    }

    #[tokio::test]
    async fn rejection_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = start("alice", dir.path());
        c.server.reader.next_frame().await.unwrap();
        c.server
            .writer
            .write_frame(&Frame::Control(Control::Error("Username already taken".into())))
            .await
            .unwrap();
        let (_, result) = c.task.await.unwrap();
        assert_eq!(
            result.unwrap(),
            Ending::Rejected("Username already taken".into())
        );
    }

    #[tokio::test]
    async fn kicked_and_lost_connections() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = start("carol", dir.path());
        c.server
            .writer
            .write_frame(&Frame::Control(Control::Closed))
            .await
            .unwrap();
        assert_eq!(c.task.await.unwrap().1.unwrap(), Ending::Kicked);

        let mut c = start("dave", dir.path());
        c.server.reader.next_frame().await.unwrap();
        drop(c.server);
        assert_eq!(c.task.await.unwrap().1.unwrap(), Ending::ConnectionLost);
    }

    #[tokio::test]
    async fn exhausted_stamp_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = start("hana", dir.path());
        c.server.reader.next_frame().await.unwrap();

        c.server
            .writer
            .write_encoded(format!("MSG:hi:hana={}\n", u64::MAX).as_bytes())
            .await
            .unwrap();
        let (session, result) = c.task.await.unwrap();
        assert!(matches!(result, Err(RelayError::ProtocolDecode(_))));
        assert_eq!(session.clock().await, stamp("hana=0"));
        assert!(c.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn receives_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = start("erin", dir.path());
        c.server.reader.next_frame().await.unwrap();

        let payload: Vec<u8> = (0..150_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut source = &payload[..];
        c.server
            .writer
            .write_file("pic.png", &stamp("server=4"), &mut source)
            .await
            .unwrap();

        match c.events.recv().await {
            Some(ClientEvent::FileReceived { path, bytes, .. }) => {
                assert_eq!(bytes, 150_000);
                assert_eq!(path, dir.path().join("received_pic.png"));
                assert_eq!(std::fs::read(path).unwrap(), payload);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn sends_file_with_stamp() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"line one\nline two\n").unwrap();
        let mut c = start("frank", dir.path());
        c.server.reader.next_frame().await.unwrap();

        c.commands
            .send(ClientCommand::SendFile("missing.txt".into()))
            .await
            .unwrap();
        assert!(matches!(c.events.recv().await, Some(ClientEvent::Error(_))));

        c.commands
            .send(ClientCommand::SendFile("notes.txt".into()))
            .await
            .unwrap();
        assert_eq!(
            c.server.reader.next_frame().await.unwrap(),
            Some(Frame::file("notes.txt", stamp("frank=1")))
        );
        assert_eq!(
            c.server.reader.decode_file_body().await.unwrap(),
            b"line one\nline two\n"
        );
        assert_eq!(
            c.events.recv().await,
            Some(ClientEvent::FileSent {
                name: "notes.txt".into(),
                bytes: 18,
            })
        );
    }

    #[tokio::test]
    async fn file_containing_end_marker_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = b"before ".to_vec();
        body.extend_from_slice(SENTINEL);
        std::fs::write(dir.path().join("trap.txt"), &body).unwrap();
        let mut c = start("gina", dir.path());
        c.server.reader.next_frame().await.unwrap();

        c.commands
            .send(ClientCommand::SendFile("trap.txt".into()))
            .await
            .unwrap();
        let (_, result) = c.task.await.unwrap();
        assert!(matches!(result, Err(RelayError::Encode(_))));
    }
}
