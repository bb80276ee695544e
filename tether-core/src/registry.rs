//! Registry of the peers a host currently knows about.
//!
//! Peers are kept densely packed. Each engine connection slot maps to the peer's
//! current position, so lookup by id is O(1); removal swaps the last peer into
//! the hole and patches its slot entry. Positions therefore move on every
//! removal. Hold on to a [`PeerId`], never to a position.

use std::fmt;

use crate::address::Address;

/// Stable identity of a connection, valid while the peer is registered.
/// Ids are recycled after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u16);

impl PeerId {
    pub(crate) fn new(slot: u16) -> Self {
        Self(slot)
    }

    pub(crate) fn slot(self) -> u16 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registered peer as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    id: PeerId,
    address: Address,
}

impl PeerInfo {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

#[derive(Debug, Default)]
pub(crate) struct PeerRegistry {
    peers: Vec<PeerInfo>,
    /// Position in `peers`, indexed by connection slot.
    slots: Vec<Option<usize>>,
}

impl PeerRegistry {
    pub fn with_capacity(peer_limit: usize) -> Self {
        Self {
            peers: Vec::with_capacity(peer_limit),
            slots: vec![None; peer_limit],
        }
    }

    /// Register `id`, or return its current position if already present.
    pub fn insert(&mut self, id: PeerId, address: Address) -> usize {
        if id.index() >= self.slots.len() {
            self.slots.resize(id.index() + 1, None);
        }
        if let Some(position) = self.slots[id.index()] {
            return position;
        }
        let position = self.peers.len();
        self.peers.push(PeerInfo { id, address });
        self.slots[id.index()] = Some(position);
        position
    }

    /// Swap-remove `id`. Returns the removed entry.
    pub fn remove(&mut self, id: PeerId) -> Option<PeerInfo> {
        let position = self.slots.get_mut(id.index())?.take()?;
        let removed = self.peers.swap_remove(position);
        if let Some(moved) = self.peers.get(position) {
            self.slots[moved.id.index()] = Some(position);
        }
        Some(removed)
    }

    pub fn position(&self, id: PeerId) -> Option<usize> {
        self.slots.get(id.index()).copied().flatten()
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerInfo> {
        self.position(id).map(|position| &self.peers[position])
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.iter()
    }
}
