//! Transport engine capability interface
//!
//! The SFU never talks to a peer connection directly. It drives a
//! [`PeerTransport`] and consumes the [`TransportEvent`]s the transport
//! queues on its event channel, so engine callbacks never re-enter the
//! registry or the forwarding engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_remote::TrackRemote;

use crate::error::Result;
use crate::signaling::{IceCandidateInit, SessionDescription};
use crate::types::{PeerId, TrackId};

/// Negotiation state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
    Unknown,
}

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
    Unknown,
}

/// A track relayed by the SFU: the local RTP track fed from one peer's
/// inbound media and sent to every other peer.
#[derive(Clone)]
pub struct RelayTrack {
    pub id: TrackId,
    pub owner: PeerId,
    local: Arc<TrackLocalStaticRTP>,
}

impl RelayTrack {
    /// Create the local side of a relayed track. The stream id is the owner's
    /// peer id so receivers can group tracks per remote participant.
    #[must_use]
    pub fn new(id: TrackId, owner: PeerId, codec: RTCRtpCodecCapability) -> Self {
        let local = Arc::new(TrackLocalStaticRTP::new(
            codec,
            id.as_str().to_string(),
            owner.as_str().to_string(),
        ));
        Self { id, owner, local }
    }

    #[must_use]
    pub const fn local(&self) -> &Arc<TrackLocalStaticRTP> {
        &self.local
    }
}

impl std::fmt::Debug for RelayTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayTrack")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Remote media track announced by the transport
pub struct InboundTrack {
    pub remote: Arc<TrackRemote>,
}

/// Event raised by a transport, delivered through its event channel
pub enum TransportEvent {
    /// A locally gathered ICE candidate; `None` marks the end of gathering
    IceCandidate(Option<IceCandidateInit>),
    SignalingStateChange(SignalingState),
    ConnectionStateChange(ConnectionState),
    Track(InboundTrack),
    NegotiationNeeded,
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IceCandidate(c) => f.debug_tuple("IceCandidate").field(c).finish(),
            Self::SignalingStateChange(s) => f.debug_tuple("SignalingStateChange").field(s).finish(),
            Self::ConnectionStateChange(s) => {
                f.debug_tuple("ConnectionStateChange").field(s).finish()
            }
            Self::Track(t) => f.debug_tuple("Track").field(&t.remote.id()).finish(),
            Self::NegotiationNeeded => f.write_str("NegotiationNeeded"),
        }
    }
}

/// Per-peer media transport
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()>;

    /// Add `track` as an outbound sender. Returns `false` when a sender for
    /// the same owner and track id already exists, in which case nothing
    /// changes.
    async fn add_track(&self, track: &RelayTrack) -> Result<bool>;

    /// Remove every outbound sender carrying `owner`'s `track_id`, returning
    /// how many were removed. Senders of other owners are left alone even
    /// when they reuse the same track id.
    async fn remove_track(&self, owner: &PeerId, track_id: &TrackId) -> Result<usize>;

    /// Owner and track id of all current outbound senders.
    async fn sender_tracks(&self) -> Vec<(PeerId, TrackId)>;

    /// Synchronization sources of receiving tracks that have one assigned.
    async fn receiver_sources(&self) -> Vec<u32>;

    fn signaling_state(&self) -> SignalingState;

    /// Subscribe to signaling state transitions.
    fn signaling_changes(&self) -> watch::Receiver<SignalingState>;

    fn connection_state(&self) -> ConnectionState;

    /// Send one picture-loss-indication addressed to `media_ssrc`.
    async fn write_picture_loss_indication(&self, media_ssrc: u32) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A freshly created transport together with its event stream
pub struct TransportHandle {
    pub transport: Arc<dyn PeerTransport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Creates one transport per connecting peer
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, peer_id: &PeerId) -> Result<TransportHandle>;
}
