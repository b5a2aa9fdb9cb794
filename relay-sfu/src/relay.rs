//! Media relay
//!
//! One task per inbound track: copy RTP from the remote track into the local
//! track every other peer sends, and retract the track when the copy ends.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

use crate::forwarding::Forwarder;
use crate::transport::RelayTrack;
use crate::types::{PeerId, TrackId};

/// MTU-sized read buffer
const RTP_BUFFER_SIZE: usize = 1500;

/// Start relaying `remote`, published by `owner`.
pub fn spawn_relay(forwarder: Forwarder, owner: PeerId, remote: Arc<TrackRemote>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let track_id = TrackId::new(remote.id());
        let codec = remote.codec().capability;

        info!(
            peer_id = %owner,
            track_id = %track_id,
            kind = %remote.kind(),
            codec = %codec.mime_type,
            ssrc = remote.ssrc(),
            "Relaying inbound track"
        );

        let track = RelayTrack::new(track_id.clone(), owner.clone(), codec);
        forwarder.add_track(&owner, track.clone()).await;
        forwarder.solicitor().sweep().await;

        let packets = copy_packets(&remote, &track).await;

        info!(peer_id = %owner, track_id = %track_id, packets, "Inbound track ended");
        forwarder.remove_track(&owner, &track_id).await;
    })
}

async fn copy_packets(remote: &TrackRemote, track: &RelayTrack) -> u64 {
    let mut buf = vec![0u8; RTP_BUFFER_SIZE];
    let mut packets = 0u64;

    loop {
        let packet = match remote.read(&mut buf).await {
            Ok((packet, _attributes)) => packet,
            Err(e) => {
                debug!(track_id = %track.id, error = %e, "RTP read ended");
                return packets;
            }
        };

        match track.local().write_rtp(&packet).await {
            Ok(_) => packets += 1,
            // A sender went away between bind and write.
            Err(webrtc::Error::ErrClosedPipe) => {}
            Err(e) => {
                warn!(track_id = %track.id, error = %e, "RTP write failed");
                return packets;
            }
        }
    }
}
