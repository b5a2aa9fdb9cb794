//! Peer registry
//!
//! The single source of truth for which peers are live. Every sweep over the
//! registry works on a snapshot taken under one read-lock hold; no transport
//! call ever happens while the lock is held.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::peer::Peer;
use crate::types::PeerId;

#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: Arc<Peer>) -> Result<()> {
        let mut peers = self.peers.write();
        if peers.contains_key(&peer.id) {
            return Err(Error::AlreadyExists(format!("peer {}", peer.id)));
        }
        peers.insert(peer.id.clone(), peer);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.read().get(id).cloned()
    }

    pub fn unregister(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.write().remove(id)
    }

    /// Copy of every registered peer. Peers registered after the call are not
    /// included; peers unregistered after the call still are.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.read().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.len())
            .finish()
    }
}
