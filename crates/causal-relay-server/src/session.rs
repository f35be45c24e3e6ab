//! One client connection, server side.
//!
//! A session waits for the `NAME:` claim, registers the name, then runs two
//! loops over the same connection until either ends:
//!
//! - inbound: decode frames, resolve the sender, report the event, merge its
//!   stamp into the registry and relay clocks;
//! - outbound: drain the queue filled by the dispatcher and write frames.
//!
//! When one loop finishes the other is dropped, the registration is released
//! and the connection is closed.

use crate::dispatcher::Dispatcher;
use crate::event::{EventSender, RelayEvent};
use crate::registry::{ClaimOutcome, ConnId, Connection, Outbound};
use causal_relay_core::{
    Control, FileStore, Frame, FrameReader, FrameWriter, ParticipantId, RelayError, SessionState,
    Stamp,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

const TAKEN_REASON: &str = "Username already taken";

pub struct Session {
    conn_id: ConnId,
    addr: SocketAddr,
    state: SessionState,
    dispatcher: Arc<Dispatcher>,
    store: FileStore,
    events: EventSender,
}

impl Session {
    pub fn new(
        conn_id: ConnId,
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        events: EventSender,
    ) -> Self {
        let store = dispatcher.store().clone();
        Self {
            conn_id,
            addr,
            state: SessionState::AwaitingIdentity,
            dispatcher,
            store,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the connection until it closes.
    pub async fn run<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::info!(addr = %self.addr, "new connection");
        let (read, write) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read);
        let mut writer = FrameWriter::new(write);

        let Some(id) = self.await_identity(&mut reader).await else {
            self.set_state(SessionState::Closed);
            let _ = writer.shutdown().await;
            return;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(self.conn_id, self.addr, tx);
        let registry = self.dispatcher.registry();
        if let ClaimOutcome::Rejected(reason) = registry.claim(id.clone(), conn).await {
            let err = RelayError::IdentityTaken(id.clone());
            tracing::info!(addr = %self.addr, ?reason, "claim rejected: {err}");
            self.report(RelayEvent::Rejected {
                name: id,
                addr: self.addr,
            });
            let notice = Frame::Control(Control::Error(TAKEN_REASON.to_string()));
            if let Err(e) = writer.write_frame(&notice).await {
                tracing::debug!(addr = %self.addr, "could not send rejection: {e}");
            }
            let _ = writer.shutdown().await;
            self.set_state(SessionState::Closed);
            return;
        }

        self.set_state(SessionState::Active);
        tracing::info!(participant = %id, addr = %self.addr, "identified");
        self.report(RelayEvent::Joined {
            id: id.clone(),
            addr: self.addr,
        });

        let result = tokio::select! {
            r = self.inbound(&mut reader) => r,
            r = self.outbound(&id, &mut writer, rx) => r,
        };

        self.set_state(SessionState::Closed);
        let _ = writer.shutdown().await;
        let released = self
            .dispatcher
            .registry()
            .release_connection(self.conn_id)
            .await;

        let error = match result {
            Ok(()) | Err(RelayError::TransportClosed) => {
                tracing::info!(participant = %id, "connection closed");
                None
            }
            Err(e) => {
                tracing::warn!(participant = %id, "session ended: {e}");
                Some(e.to_string())
            }
        };
        // A name released by the operator was already reported by the console.
        if released.is_some() || error.is_some() {
            self.report(RelayEvent::Left { id, error });
        }
    }

    async fn await_identity<R>(&self, reader: &mut FrameReader<R>) -> Option<ParticipantId>
    where
        R: AsyncRead + Unpin,
    {
        match reader.next_frame().await {
            Ok(Some(Frame::Control(Control::Claim(id)))) => Some(id),
            Ok(None) => {
                tracing::info!(addr = %self.addr, "disconnected before sending username");
                None
            }
            Ok(Some(frame)) => {
                tracing::info!(addr = %self.addr, ?frame, "first frame was not a claim");
                self.report(RelayEvent::Unidentified { addr: self.addr });
                None
            }
            Err(e) => {
                tracing::warn!(addr = %self.addr, "bad claim: {e}");
                self.report(RelayEvent::Unidentified { addr: self.addr });
                None
            }
        }
    }

    async fn inbound<R>(&self, reader: &mut FrameReader<R>) -> Result<(), RelayError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let Some(frame) = reader.next_frame().await? else {
                return Err(RelayError::TransportClosed);
            };
            let Some(from) = self.dispatcher.registry().resolve(self.conn_id).await else {
                // Released by the operator. Outbound ends once the close
                // notice is written, so stop reading and let it finish.
                tracing::debug!(addr = %self.addr, "dropping frame from released connection");
                return std::future::pending().await;
            };
            match frame {
                Frame::Chat { body, stamp } => {
                    self.report(RelayEvent::Chat {
                        from: from.clone(),
                        body,
                        stamp: stamp.clone(),
                    });
                    self.merge(&from, &stamp).await;
                }
                Frame::File { name, stamp } => {
                    self.receive_file(reader, &from, name).await?;
                    self.merge(&from, &stamp).await;
                }
                Frame::Control(control) => {
                    tracing::debug!(participant = %from, ?control, "ignoring control frame");
                }
            }
        }
    }

    async fn receive_file<R>(
        &self,
        reader: &mut FrameReader<R>,
        from: &ParticipantId,
        name: String,
    ) -> Result<(), RelayError>
    where
        R: AsyncRead + Unpin,
    {
        tracing::info!(participant = %from, file = %name, "receiving file");
        match self.store.open_for_write(&name).await {
            Ok((mut file, path)) => {
                let bytes = reader.read_file_body(&mut file).await?;
                self.report(RelayEvent::FileReceived {
                    from: from.clone(),
                    name,
                    path,
                    bytes,
                });
            }
            Err(e) => {
                // Keep the stream in frame even though the payload is lost.
                reader.read_file_body(&mut tokio::io::sink()).await?;
                self.report(RelayEvent::Error {
                    id: from.clone(),
                    message: format!("could not store '{name}': {e}"),
                });
            }
        }
        Ok(())
    }

    async fn merge(&self, from: &ParticipantId, stamp: &Stamp) {
        self.dispatcher
            .registry()
            .merge_clock(from, stamp, true)
            .await;
        self.dispatcher.observe(stamp).await;
    }

    async fn outbound<W>(
        &self,
        id: &ParticipantId,
        writer: &mut FrameWriter<W>,
        mut rx: mpsc::UnboundedReceiver<Outbound>,
    ) -> Result<(), RelayError>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Line(bytes) => writer.write_encoded(&bytes).await?,
                Outbound::File { path, name, stamp } => {
                    let mut file = match self.store.open_for_read(&path).await {
                        Ok(file) => file,
                        Err(e) => {
                            self.report(RelayEvent::Error {
                                id: id.clone(),
                                message: e.to_string(),
                            });
                            continue;
                        }
                    };
                    let bytes = writer.write_file(&name, &stamp, &mut file).await?;
                    self.report(RelayEvent::FileSent {
                        to: id.clone(),
                        name,
                        bytes,
                    });
                }
                Outbound::Close(control) => {
                    writer.write_frame(&Frame::Control(control)).await?;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn set_state(&mut self, state: SessionState) {
        tracing::debug!(addr = %self.addr, from = ?self.state, to = ?state, "session state");
        self.state = state;
    }

    fn report(&self, event: RelayEvent) {
        // The console may already be gone during shutdown.
        let _ = self.events.send(event);
    }
}
