//! Track forwarding engine
//!
//! Decides which relayed tracks flow into which peer's transport and retracts
//! them again. All sweeps run over a registry snapshot with the lock released,
//! so transport calls (which may block on I/O) never happen under the lock.
//!
//! A forward can race with the retraction of the same track. After every add
//! the engine re-checks that the owner still holds the track and undoes the
//! add otherwise; the owner drops the track from its set before sweeping, so
//! one of the two sides always sees the other and no sender is left dangling.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::keyframe::KeyframeSolicitor;
use crate::peer::Peer;
use crate::registry::PeerRegistry;
use crate::transport::RelayTrack;
use crate::types::{PeerId, TrackId};

#[derive(Clone)]
pub struct Forwarder {
    registry: Arc<PeerRegistry>,
    solicitor: KeyframeSolicitor,
}

impl Forwarder {
    #[must_use]
    pub const fn new(registry: Arc<PeerRegistry>, solicitor: KeyframeSolicitor) -> Self {
        Self {
            registry,
            solicitor,
        }
    }

    #[must_use]
    pub const fn solicitor(&self) -> &KeyframeSolicitor {
        &self.solicitor
    }

    /// Record `track` as originated by `owner_id` and send it to every other
    /// registered peer.
    pub async fn add_track(&self, owner_id: &PeerId, track: RelayTrack) {
        let Some(owner) = self.registry.get(owner_id) else {
            warn!(peer_id = %owner_id, track_id = %track.id, "Cannot add track: peer does not exist");
            return;
        };
        self.publish(&owner, track).await;
    }

    async fn publish(&self, owner: &Arc<Peer>, track: RelayTrack) {
        if !owner.insert_local_track(track.clone()) {
            debug!(peer_id = %owner.id, track_id = %track.id, "Track already forwarded");
            return;
        }

        // The owner may have been unregistered and drained between lookup and
        // insert; nobody would retract the track then.
        let registered = self
            .registry
            .get(&owner.id)
            .is_some_and(|current| Arc::ptr_eq(&current, owner));
        if !registered {
            owner.take_local_track(&track.id);
            debug!(peer_id = %owner.id, track_id = %track.id, "Owner left before track was forwarded");
            return;
        }

        info!(peer_id = %owner.id, track_id = %track.id, "Forwarding new track");

        for target in self.registry.snapshot() {
            if target.id == owner.id {
                continue;
            }
            self.forward(owner, &target, &track).await;
        }
    }

    /// Send every other peer's local tracks to `peer_id`, then ask all
    /// publishers for a keyframe so the new receiver does not start frozen.
    pub async fn add_all_tracks(&self, peer_id: &PeerId) {
        let Some(target) = self.registry.get(peer_id) else {
            warn!(peer_id = %peer_id, "Cannot add tracks: peer does not exist");
            return;
        };

        let mut forwarded = 0usize;
        for owner in self.registry.snapshot() {
            if owner.id == *peer_id {
                continue;
            }
            for track in owner.local_tracks() {
                if self.forward(&owner, &target, &track).await {
                    forwarded += 1;
                }
            }
        }

        info!(peer_id = %peer_id, forwarded, "Added existing tracks to peer");
        self.solicitor.sweep().await;
    }

    /// Stop forwarding `track_id`: drop it from the owner's set (if still
    /// owned) and remove its sender from every other peer.
    pub async fn remove_track(&self, owner_id: &PeerId, track_id: &TrackId) {
        if let Some(owner) = self.registry.get(owner_id) {
            owner.take_local_track(track_id);
        }
        self.retract(owner_id, track_id).await;
    }

    /// Tear down a peer: unregister it, retract everything it owned and close
    /// its transport.
    pub async fn remove_peer(&self, peer_id: &PeerId) {
        let Some(peer) = self.registry.unregister(peer_id) else {
            warn!(peer_id = %peer_id, "Cannot remove peer: peer does not exist");
            return;
        };

        let tracks = peer.drain_local_tracks();
        for track in &tracks {
            self.retract(peer_id, &track.id).await;
        }

        if let Err(e) = peer.transport().close().await {
            warn!(peer_id = %peer_id, error = %e, "Failed to close transport");
        }

        info!(
            peer_id = %peer_id,
            retracted = tracks.len(),
            remaining_peers = self.registry.len(),
            "Removed peer"
        );
    }

    /// Add `track` to `target`, undoing the add if `owner` dropped the track
    /// meanwhile. Returns whether a new sender was created and kept.
    async fn forward(&self, owner: &Peer, target: &Peer, track: &RelayTrack) -> bool {
        let added = match target.transport().add_track(track).await {
            Ok(added) => added,
            Err(e) => {
                warn!(
                    peer_id = %target.id,
                    track_id = %track.id,
                    error = %e,
                    "Failed to add track to peer"
                );
                return false;
            }
        };

        if owner.owns(&track.id) {
            if added {
                debug!(peer_id = %target.id, track_id = %track.id, "Track added to peer");
            }
            return added;
        }

        debug!(peer_id = %target.id, track_id = %track.id, "Track retracted during forward");
        if let Err(e) = target.transport().remove_track(&owner.id, &track.id).await {
            warn!(peer_id = %target.id, track_id = %track.id, error = %e, "Failed to undo forward");
        }
        false
    }

    async fn retract(&self, owner_id: &PeerId, track_id: &TrackId) {
        for target in self.registry.snapshot() {
            if target.id == *owner_id {
                continue;
            }
            match target.transport().remove_track(owner_id, track_id).await {
                Ok(0) => {}
                Ok(removed) => {
                    debug!(peer_id = %target.id, track_id = %track_id, removed, "Track removed from peer");
                }
                Err(e) => {
                    warn!(
                        peer_id = %target.id,
                        track_id = %track_id,
                        error = %e,
                        "Failed to remove track from peer"
                    );
                }
            }
        }
    }
}
