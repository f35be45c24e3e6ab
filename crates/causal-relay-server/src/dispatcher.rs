//! Operator fan-out.
//!
//! The dispatcher stamps outgoing events with the relay's own clock and
//! queues them on the recipients' sessions. Each fan-out takes a snapshot of
//! its recipients first, so clients joining or leaving mid-send do not affect
//! it, and a recipient that has gone away is reported without stopping
//! delivery to the rest.

use crate::registry::{Connection, Outbound, Registry};
use causal_relay_core::{
    Control, FileStore, Frame, ParticipantId, RelayError, Stamp, VectorClock, wire_name,
};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

/// Who an operator command is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    All,
    Named(Vec<String>),
}

impl Targets {
    /// Parse `all` or a comma-separated list of names.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.eq_ignore_ascii_case("all") {
            return Targets::All;
        }
        Targets::Named(
            text.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The stamp carried by the event, if anything was sent.
    pub stamp: Option<Stamp>,
    pub delivered: Vec<ParticipantId>,
    /// Recipients whose connection closed before the event was queued.
    pub failed: Vec<ParticipantId>,
    /// Requested names with no live client.
    pub unresolved: Vec<String>,
}

impl Delivery {
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    store: FileStore,
    clock: Mutex<VectorClock>,
    shutdown: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(name: ParticipantId, registry: Arc<Registry>, store: FileStore) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            store,
            clock: Mutex::new(VectorClock::new(name)),
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Fires once [`shutdown_all`](Self::shutdown_all) has run.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// The relay's own clock.
    pub async fn clock(&self) -> Stamp {
        self.clock.lock().await.snapshot()
    }

    /// Fold a stamp received from a peer into the relay's clock.
    pub async fn observe(&self, stamp: &Stamp) {
        self.clock.lock().await.merge(stamp);
    }

    async fn next_stamp(&self) -> Stamp {
        let mut clock = self.clock.lock().await;
        clock.increment();
        clock.snapshot()
    }

    /// Send a chat message to every connected client.
    pub async fn broadcast(&self, body: &str) -> Result<Delivery, RelayError> {
        let recipients = self.registry.recipients().await;
        self.send_chat(body, recipients, Vec::new()).await
    }

    /// Send a chat message to the named clients that are connected.
    pub async fn multicast(
        &self,
        body: &str,
        targets: &[String],
    ) -> Result<Delivery, RelayError> {
        let (recipients, unresolved) = self.resolve_targets(targets).await;
        self.send_chat(body, recipients, unresolved).await
    }

    pub async fn send_message(
        &self,
        body: &str,
        targets: &Targets,
    ) -> Result<Delivery, RelayError> {
        match targets {
            Targets::All => self.broadcast(body).await,
            Targets::Named(names) => self.multicast(body, names).await,
        }
    }

    async fn send_chat(
        &self,
        body: &str,
        recipients: Vec<(ParticipantId, Connection)>,
        unresolved: Vec<String>,
    ) -> Result<Delivery, RelayError> {
        let mut delivery = Delivery {
            unresolved,
            ..Delivery::default()
        };
        if recipients.is_empty() {
            return Ok(delivery);
        }

        let stamp = self.next_stamp().await;
        let line: Arc<[u8]> = Frame::chat(body, stamp.clone()).encode()?.into();
        for (id, conn) in recipients {
            if conn.send(Outbound::Line(line.clone())) {
                self.registry.merge_clock(&id, &stamp, false).await;
                tracing::debug!(to = %id, "message queued");
                delivery.delivered.push(id);
            } else {
                tracing::warn!(to = %id, "recipient closed before message could be queued");
                delivery.failed.push(id);
            }
        }
        delivery.stamp = Some(stamp);
        Ok(delivery)
    }

    /// Stream a local file to one client.
    pub async fn unicast_file(&self, filename: &str, target: &str) -> Result<Stamp, RelayError> {
        let (id, conn) = self.lookup(target).await?;
        let name = self.check_file(filename).await?;
        self.queue_file(filename, &name, &id, &conn).await
    }

    /// Name announced for `filename`, once it is known to be readable.
    ///
    /// Checked here rather than inside the sessions so the operator sees it.
    async fn check_file(&self, filename: &str) -> Result<String, RelayError> {
        let name = wire_name(filename)
            .ok_or_else(|| RelayError::FileNotFound(filename.to_string()))?
            .to_string();
        drop(self.store.open_for_read(filename).await?);
        Ok(name)
    }

    async fn queue_file(
        &self,
        filename: &str,
        name: &str,
        id: &ParticipantId,
        conn: &Connection,
    ) -> Result<Stamp, RelayError> {
        let stamp = self.next_stamp().await;
        let queued = conn.send(Outbound::File {
            path: filename.to_string(),
            name: name.to_string(),
            stamp: stamp.clone(),
        });
        if !queued {
            return Err(RelayError::TransportClosed);
        }
        self.registry.merge_clock(id, &stamp, false).await;
        Ok(stamp)
    }

    /// Send a file to each target in turn. Each copy carries its own stamp.
    ///
    /// The file is checked once up front; a copy whose recipient has gone is
    /// recorded in [`Delivery::failed`] and the rest still go out.
    pub async fn send_file(
        &self,
        filename: &str,
        targets: &Targets,
    ) -> Result<Delivery, RelayError> {
        let name = self.check_file(filename).await?;
        let (recipients, unresolved) = match targets {
            Targets::All => (self.registry.recipients().await, Vec::new()),
            Targets::Named(names) => self.resolve_targets(names).await,
        };
        let mut delivery = Delivery {
            unresolved,
            ..Delivery::default()
        };
        for (id, conn) in recipients {
            match self.queue_file(filename, &name, &id, &conn).await {
                Ok(stamp) => {
                    delivery.stamp = Some(stamp);
                    delivery.delivered.push(id);
                }
                Err(e) => {
                    tracing::warn!(to = %id, "file not queued: {e}");
                    delivery.failed.push(id);
                }
            }
        }
        Ok(delivery)
    }

    /// Tell `target` it is being disconnected and drop its registration.
    pub async fn disconnect(&self, target: &str) -> Result<(), RelayError> {
        let id: ParticipantId = target
            .parse()
            .map_err(|_| RelayError::TargetUnresolved(target.to_string()))?;
        let conn = self
            .registry
            .release(&id)
            .await
            .ok_or_else(|| RelayError::TargetUnresolved(target.to_string()))?;
        if !conn.send(Outbound::Close(Control::Closed)) {
            tracing::debug!(participant = %id, "already closed");
        }
        tracing::info!(participant = %id, "disconnected by operator");
        Ok(())
    }

    /// Notify every client that the relay is stopping, then stop accepting.
    ///
    /// Returns how many clients were notified.
    pub async fn shutdown_all(&self) -> usize {
        let mut notified = 0;
        for (id, conn) in self.registry.recipients().await {
            if conn.send(Outbound::Close(Control::Shutdown)) {
                notified += 1;
            } else {
                tracing::debug!(participant = %id, "already closed");
            }
        }
        self.shutdown.send_replace(true);
        tracing::info!(notified, "shutting down");
        notified
    }

    async fn lookup(&self, target: &str) -> Result<(ParticipantId, Connection), RelayError> {
        let unresolved = || RelayError::TargetUnresolved(target.to_string());
        let id: ParticipantId = target.parse().map_err(|_| unresolved())?;
        let conn = self.registry.connection(&id).await.ok_or_else(unresolved)?;
        Ok((id, conn))
    }

    async fn resolve_targets(
        &self,
        names: &[String],
    ) -> (Vec<(ParticipantId, Connection)>, Vec<String>) {
        let mut resolved: Vec<(ParticipantId, Connection)> = Vec::new();
        let mut unresolved = Vec::new();
        for name in names {
            match self.lookup(name).await {
                Ok((id, conn)) => {
                    if !resolved.iter().any(|(other, _)| *other == id) {
                        resolved.push((id, conn));
                    }
                }
                Err(_) => unresolved.push(name.clone()),
            }
        }
        (resolved, unresolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnId;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    fn id(name: &str) -> ParticipantId {
        name.parse().unwrap()
    }

    fn dispatcher(dir: &std::path::Path) -> Dispatcher {
        Dispatcher::new(
            id("server"),
            Arc::new(Registry::new()),
            FileStore::new(dir),
        )
    }

    async fn join(
        dispatcher: &Dispatcher,
        name: &str,
        n: ConnId,
    ) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = ([127, 0, 0, 1], 50000 + n as u16).into();
        dispatcher
            .registry()
            .claim(id(name), Connection::new(n, addr, tx))
            .await;
        rx
    }

    fn line(out: Outbound) -> Vec<u8> {
        match out {
            Outbound::Line(bytes) => bytes.to_vec(),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_sends_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let mut alice = join(&d, "alice", 1).await;
        let mut bob = join(&d, "bob", 2).await;

        let delivery = d.broadcast("hi").await.unwrap();
        assert_eq!(delivery.delivered, vec![id("alice"), id("bob")]);

        let a = line(alice.recv().await.unwrap());
        let b = line(bob.recv().await.unwrap());
        assert_eq!(a, b"MSG:hi:server=1\n");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn failed_recipient_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let alice = join(&d, "alice", 1).await;
        let mut bob = join(&d, "bob", 2).await;
        drop(alice);

        let delivery = d.broadcast("hi").await.unwrap();
        assert_eq!(delivery.failed, vec![id("alice")]);
        assert_eq!(delivery.delivered, vec![id("bob")]);
        assert_eq!(line(bob.recv().await.unwrap()), b"MSG:hi:server=1\n");
    }

    #[tokio::test]
    async fn multicast_skips_unknown_names() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let mut alice = join(&d, "alice", 1).await;
        let mut bob = join(&d, "bob", 2).await;

        let targets = Targets::parse("alice, ghost, alice");
        let delivery = d.send_message("psst", &targets).await.unwrap();
        assert_eq!(delivery.delivered, vec![id("alice")]);
        assert_eq!(delivery.unresolved, vec!["ghost".to_string()]);
        assert_eq!(line(alice.recv().await.unwrap()), b"MSG:psst:server=1\n");
        assert!(alice.try_recv().is_err());
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn nothing_sent_means_no_tick() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let delivery = d.multicast("hello?", &["nobody".into()]).await.unwrap();
        assert!(delivery.is_empty());
        assert_eq!(d.clock().await.to_string(), "server=0");
    }

    #[tokio::test]
    async fn stamps_carry_merged_knowledge() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let mut alice = join(&d, "alice", 1).await;

        d.observe(&"alice=3".parse().unwrap()).await;
        d.broadcast("ack").await.unwrap();
        assert_eq!(
            line(alice.recv().await.unwrap()),
            b"MSG:ack:alice=3,server=1\n"
        );
        let record = d.registry().clock(&id("alice")).await.unwrap();
        assert_eq!(record.to_string(), "alice=3,server=1");
    }

    #[tokio::test]
    async fn file_to_missing_path_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let mut alice = join(&d, "alice", 1).await;

        let err = d.unicast_file("missing.bin", "alice").await.unwrap_err();
        assert!(matches!(err, RelayError::FileNotFound(_)));
        assert!(alice.try_recv().is_err());
        assert_eq!(d.clock().await.to_string(), "server=0");
    }

    #[tokio::test]
    async fn file_is_queued_per_recipient() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/plan.txt"), b"plan").unwrap();
        let d = dispatcher(dir.path());
        let mut alice = join(&d, "alice", 1).await;
        let mut bob = join(&d, "bob", 2).await;

        let delivery = d.send_file("docs/plan.txt", &Targets::All).await.unwrap();
        assert_eq!(delivery.delivered.len(), 2);

        match alice.recv().await.unwrap() {
            Outbound::File { path, name, stamp } => {
                assert_eq!(path, "docs/plan.txt");
                assert_eq!(name, "plan.txt");
                assert_eq!(stamp.to_string(), "server=1");
            }
            other => panic!("unexpected {other:?}"),
        }
        match bob.recv().await.unwrap() {
            Outbound::File { stamp, .. } => assert_eq!(stamp.to_string(), "server=2"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_fanout_keeps_partial_delivery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"notes").unwrap();
        let d = dispatcher(dir.path());
        let mut alice = join(&d, "alice", 1).await;
        let bob = join(&d, "bob", 2).await;
        let mut carol = join(&d, "carol", 3).await;
        drop(bob);

        let delivery = d.send_file("notes.txt", &Targets::All).await.unwrap();
        assert_eq!(delivery.delivered, vec![id("alice"), id("carol")]);
        assert_eq!(delivery.failed, vec![id("bob")]);
        assert!(matches!(alice.recv().await, Some(Outbound::File { .. })));
        assert!(matches!(carol.recv().await, Some(Outbound::File { .. })));

        // The file is checked before anything is queued or stamped.
        std::fs::remove_file(dir.path().join("notes.txt")).unwrap();
        let before = d.clock().await;
        assert!(matches!(
            d.send_file("notes.txt", &Targets::All).await,
            Err(RelayError::FileNotFound(_))
        ));
        assert_eq!(d.clock().await, before);
        assert!(alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn exhausted_peer_stamp_is_rejected_before_it_reaches_the_clock() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let mut alice = join(&d, "alice", 1).await;

        assert!(format!("server={}", u64::MAX).parse::<Stamp>().is_err());
        d.observe(&format!("server={}", causal_relay_core::MAX_TICK).parse().unwrap())
            .await;
        d.broadcast("one").await.unwrap();
        d.broadcast("two").await.unwrap();
        alice.recv().await.unwrap();
        let expected = format!("MSG:two:server={}\n", causal_relay_core::MAX_TICK + 2);
        assert_eq!(line(alice.recv().await.unwrap()), expected.as_bytes());
    }

    #[tokio::test]
    async fn unicast_to_unknown_target() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        assert!(matches!(
            d.unicast_file("x", "nobody").await,
            Err(RelayError::TargetUnresolved(name)) if name == "nobody"
        ));
    }

    #[tokio::test]
    async fn disconnect_sends_notice_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let mut alice = join(&d, "alice", 1).await;

        d.disconnect("alice").await.unwrap();
        assert!(matches!(
            alice.recv().await.unwrap(),
            Outbound::Close(Control::Closed)
        ));
        assert!(d.registry().is_empty().await);
        assert!(matches!(
            d.disconnect("alice").await,
            Err(RelayError::TargetUnresolved(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_notifies_everyone_and_signals() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let mut alice = join(&d, "alice", 1).await;
        let mut bob = join(&d, "bob", 2).await;
        let mut signal = d.subscribe_shutdown();

        assert_eq!(d.shutdown_all().await, 2);
        for rx in [&mut alice, &mut bob] {
            assert!(matches!(
                rx.recv().await.unwrap(),
                Outbound::Close(Control::Shutdown)
            ));
        }
        signal.changed().await.unwrap();
        assert!(*signal.borrow());
    }

    #[test]
    fn parses_targets() {
        assert_eq!(Targets::parse(" ALL "), Targets::All);
        assert_eq!(
            Targets::parse("alice,bob , ,"),
            Targets::Named(vec!["alice".into(), "bob".into()])
        );
    }
}
