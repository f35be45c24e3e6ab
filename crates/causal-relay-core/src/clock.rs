//! Vector clocks.
//!
//! Every participant keeps one [`VectorClock`]. It is advanced once before each
//! locally originated event is sent and merged with the [`Stamp`] carried by
//! each event received. Stamps are compared with the causal partial order: a
//! stamp precedes another when no entry is larger and at least one is smaller.
//! Missing entries count as zero.
//!
//! Wire format of a stamp: `id=tick` pairs joined by `,`, in ascending id
//! order. The empty stamp is the empty string. Ticks above [`MAX_TICK`] are
//! refused, which leaves the owner's entry room to keep increasing after any
//! merge.

use crate::identity::{IdentityParseError, ParticipantId};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Largest tick accepted from the wire.
pub const MAX_TICK: u64 = u64::MAX >> 1;

/// An immutable snapshot of a vector clock, as embedded in a frame.
#[derive(Debug, Clone, Default)]
pub struct Stamp(BTreeMap<ParticipantId, u64>);

impl Stamp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick recorded for `id`, zero if absent.
    pub fn get(&self, id: &ParticipantId) -> u64 {
        self.0.get(id).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParticipantId, u64)> {
        self.0.iter().map(|(id, tick)| (id, *tick))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `self` causally precedes `other`.
    pub fn happened_before(&self, other: &Stamp) -> bool {
        self.partial_cmp(other) == Some(Ordering::Less)
    }

    /// True if neither stamp precedes the other and they differ.
    pub fn concurrent_with(&self, other: &Stamp) -> bool {
        self.partial_cmp(other).is_none()
    }
}

impl FromIterator<(ParticipantId, u64)> for Stamp {
    fn from_iter<T: IntoIterator<Item = (ParticipantId, u64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl PartialEq for Stamp {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl Eq for Stamp {}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let mut less = false;
        let mut greater = false;
        for id in self.0.keys().chain(other.0.keys()) {
            match self.get(id).cmp(&other.get(id)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
        }
        match (less, greater) {
            (false, false) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (true, true) => None,
        }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (id, tick)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{id}={tick}")?;
        }
        Ok(())
    }
}

impl FromStr for Stamp {
    type Err = StampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = BTreeMap::new();
        if s.is_empty() {
            return Ok(Self(entries));
        }
        for entry in s.split(',') {
            let (id, tick) = entry
                .split_once('=')
                .ok_or_else(|| StampParseError::MissingEquals(entry.to_string()))?;
            let id: ParticipantId = id.parse()?;
            let tick: u64 = tick
                .parse()
                .map_err(|_| StampParseError::BadTick(tick.to_string()))?;
            if tick > MAX_TICK {
                return Err(StampParseError::Exhausted(id));
            }
            if entries.insert(id.clone(), tick).is_some() {
                return Err(StampParseError::Duplicate(id));
            }
        }
        Ok(Self(entries))
    }
}

/// Error parsing a serialized stamp.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StampParseError {
    #[error("clock entry {0:?} has no '='")]
    MissingEquals(String),
    #[error("clock entry has invalid participant: {0}")]
    BadId(#[from] IdentityParseError),
    #[error("clock tick {0:?} is not an unsigned integer")]
    BadTick(String),
    #[error("clock lists {0} more than once")]
    Duplicate(ParticipantId),
    #[error("clock entry for {0} leaves no room to advance")]
    Exhausted(ParticipantId),
}

/// A participant's own vector clock.
#[derive(Debug, Clone)]
pub struct VectorClock {
    owner: ParticipantId,
    ticks: BTreeMap<ParticipantId, u64>,
}

impl VectorClock {
    /// A fresh clock, seeded with `{owner: 0}`.
    pub fn new(owner: ParticipantId) -> Self {
        let mut ticks = BTreeMap::new();
        ticks.insert(owner.clone(), 0);
        Self { owner, ticks }
    }

    pub fn owner(&self) -> &ParticipantId {
        &self.owner
    }

    pub fn get(&self, id: &ParticipantId) -> u64 {
        self.ticks.get(id).copied().unwrap_or(0)
    }

    /// Advance the owner's entry by one.
    pub fn increment(&mut self) {
        let tick = self.ticks.entry(self.owner.clone()).or_insert(0);
        *tick += 1;
        tracing::debug!(owner = %self.owner, clock = %self.snapshot(), "clock incremented");
    }

    /// Take the entry-wise maximum with `remote`.
    pub fn merge(&mut self, remote: &Stamp) {
        for (id, tick) in remote.iter() {
            let local = self.ticks.entry(id.clone()).or_insert(0);
            *local = (*local).max(tick);
        }
        tracing::debug!(owner = %self.owner, clock = %self.snapshot(), "clock merged");
    }

    pub fn snapshot(&self) -> Stamp {
        Stamp(self.ticks.clone())
    }
}
