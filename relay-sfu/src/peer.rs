//! SFU Peer
//!
//! A peer is one connected client: its transport plus the ordered set of
//! tracks it originates, which the forwarding engine sends to everyone else.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::transport::{PeerTransport, RelayTrack};
use crate::types::{PeerId, TrackId};

pub struct Peer {
    pub id: PeerId,
    transport: Arc<dyn PeerTransport>,
    local_tracks: Mutex<Vec<RelayTrack>>,
    joined_at: Instant,
}

impl Peer {
    #[must_use]
    pub fn new(id: PeerId, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            id,
            transport,
            local_tracks: Mutex::new(Vec::new()),
            joined_at: Instant::now(),
        }
    }

    #[must_use]
    pub const fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    /// Record a locally originated track. Returns `false` if a track with the
    /// same id is already recorded.
    pub fn insert_local_track(&self, track: RelayTrack) -> bool {
        let mut tracks = self.local_tracks.lock();
        if tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        tracks.push(track);
        true
    }

    /// Drop a local track, preserving the order of the rest.
    pub fn take_local_track(&self, track_id: &TrackId) -> Option<RelayTrack> {
        let mut tracks = self.local_tracks.lock();
        let index = tracks.iter().position(|t| t.id == *track_id)?;
        Some(tracks.remove(index))
    }

    #[must_use]
    pub fn owns(&self, track_id: &TrackId) -> bool {
        self.local_tracks.lock().iter().any(|t| t.id == *track_id)
    }

    #[must_use]
    pub fn local_tracks(&self) -> Vec<RelayTrack> {
        self.local_tracks.lock().clone()
    }

    pub fn drain_local_tracks(&self) -> Vec<RelayTrack> {
        std::mem::take(&mut *self.local_tracks.lock())
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        debug!(
            peer_id = %self.id,
            session_secs = self.joined_at.elapsed().as_secs(),
            "Peer dropped"
        );
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("local_tracks", &self.local_tracks.lock().len())
            .finish_non_exhaustive()
    }
}
