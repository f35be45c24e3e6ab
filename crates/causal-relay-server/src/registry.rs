//! Connected clients.
//!
//! The registry is the only state shared between connection tasks. Every
//! operation takes the lock once and never awaits while holding it.

use causal_relay_core::{Control, ParticipantId, Stamp, VectorClock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};

/// Identifies one accepted connection for the life of the process.
pub type ConnId = u64;

/// Work queued for a session's outbound loop.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// An encoded line. Fan-out shares one buffer between recipients.
    Line(Arc<[u8]>),
    /// Stream a local file; `path` is resolved against the file store and
    /// `name` is announced in the header.
    File {
        path: String,
        name: String,
        stamp: Stamp,
    },
    /// Write a notice, then close the connection.
    Close(Control),
}

/// Handle used to queue frames for one connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnId,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    pub fn new(id: ConnId, addr: SocketAddr, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, addr, tx }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue work for the connection. Returns `false` once it has closed.
    pub fn send(&self, out: Outbound) -> bool {
        self.tx.send(out).is_ok()
    }
}

/// Result of [`Registry::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Accepted,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AlreadyTaken,
}

#[derive(Debug)]
struct Record {
    conn: Connection,
    clock: VectorClock,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<ParticipantId, Record>,
    /// Claim order, for listing and fan-out.
    order: Vec<ParticipantId>,
}

impl Inner {
    fn remove(&mut self, id: &ParticipantId) -> Option<Record> {
        let record = self.records.remove(id)?;
        self.order.retain(|other| other != id);
        Some(record)
    }
}

/// Map of claimed names to live connections and their clocks.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` for `conn` unless the name is already live.
    pub async fn claim(&self, id: ParticipantId, conn: Connection) -> ClaimOutcome {
        let mut inner = self.inner.write().await;
        if inner.records.contains_key(&id) {
            return ClaimOutcome::Rejected(RejectReason::AlreadyTaken);
        }
        let clock = VectorClock::new(id.clone());
        inner.order.push(id.clone());
        inner.records.insert(id, Record { conn, clock });
        ClaimOutcome::Accepted
    }

    /// The name claimed on connection `conn`, if any.
    pub async fn resolve(&self, conn: ConnId) -> Option<ParticipantId> {
        let inner = self.inner.read().await;
        inner
            .records
            .iter()
            .find(|(_, record)| record.conn.id == conn)
            .map(|(id, _)| id.clone())
    }

    /// Remove `id`, returning its connection. Removing an absent name is a no-op.
    pub async fn release(&self, id: &ParticipantId) -> Option<Connection> {
        let mut inner = self.inner.write().await;
        inner.remove(id).map(|record| record.conn)
    }

    /// Remove whatever name connection `conn` holds.
    ///
    /// Used by a closing session so it never removes a record that a newer
    /// connection has since claimed under the same name.
    pub async fn release_connection(&self, conn: ConnId) -> Option<ParticipantId> {
        let mut inner = self.inner.write().await;
        let id = inner
            .records
            .iter()
            .find(|(_, record)| record.conn.id == conn)
            .map(|(id, _)| id.clone())?;
        inner.remove(&id);
        Some(id)
    }

    /// Claimed names in claim order.
    pub async fn list(&self) -> Vec<ParticipantId> {
        self.inner.read().await.order.clone()
    }

    pub async fn connection(&self, id: &ParticipantId) -> Option<Connection> {
        let inner = self.inner.read().await;
        inner.records.get(id).map(|record| record.conn.clone())
    }

    /// Every live name with its connection, in claim order.
    pub async fn recipients(&self) -> Vec<(ParticipantId, Connection)> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| {
                let record = inner.records.get(id)?;
                Some((id.clone(), record.conn.clone()))
            })
            .collect()
    }

    /// Merge `stamp` into the clock kept for `id` and return the result.
    ///
    /// When the stamp comes from `id` itself and does not advance its own
    /// entry, the event arrived out of order; that is logged and merged anyway.
    pub async fn merge_clock(
        &self,
        id: &ParticipantId,
        stamp: &Stamp,
        from_peer: bool,
    ) -> Option<Stamp> {
        let mut inner = self.inner.write().await;
        let record = inner.records.get_mut(id)?;
        if from_peer && stamp.get(id) <= record.clock.get(id) {
            tracing::warn!(
                participant = %id,
                seen = record.clock.get(id),
                received = stamp.get(id),
                "event does not advance sender's clock, delivered out of order"
            );
        }
        record.clock.merge(stamp);
        Some(record.clock.snapshot())
    }

    pub async fn clock(&self, id: &ParticipantId) -> Option<Stamp> {
        let inner = self.inner.read().await;
        inner.records.get(id).map(|record| record.clock.snapshot())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
