//! `webrtc` crate adapter
//!
//! [`RtcEngine`] owns the shared media engine / interceptor stack and hands out
//! one [`RtcTransport`] per peer. Every peer-connection callback is turned into
//! a [`TransportEvent`] on an unbounded channel.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;

use crate::config::SfuConfig;
use crate::error::{Error, Result};
use crate::signaling::{IceCandidateInit, SdpType, SessionDescription};
use crate::transport::{
    ConnectionState, InboundTrack, PeerTransport, RelayTrack, SignalingState, TransportEvent,
    TransportFactory, TransportHandle,
};
use crate::types::{PeerId, TrackId};

/// Shared WebRTC API used to build every peer connection
pub struct RtcEngine {
    api: API,
    ice_servers: Vec<String>,
}

impl RtcEngine {
    /// Build the media engine (VP8 + Opus), the default interceptor chain
    /// and the API object. Failure here is fatal to the process.
    pub fn new(config: &SfuConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers: config.ice_servers.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) const fn api(&self) -> &API {
        &self.api
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for RtcEngine {
    async fn create(&self, peer_id: &PeerId) -> Result<TransportHandle> {
        let pc = Arc::new(self.api.new_peer_connection(self.configuration()).await?);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (signaling_tx, _) = watch::channel(SignalingState::Stable);
        let signaling_tx = Arc::new(signaling_tx);
        let described = Arc::new(AtomicBool::new(false));

        register_callbacks(&pc, peer_id, &events_tx, &signaling_tx, &described);

        // Placeholder transceiver so the very first offer carries a media section.
        pc.add_transceiver_from_kind(
            RTPCodecType::Audio,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Sendrecv,
                send_encodings: vec![],
            }),
        )
        .await?;

        let transport = RtcTransport {
            peer_id: peer_id.clone(),
            pc,
            signaling_tx,
            described,
            senders_lock: Mutex::new(()),
        };

        Ok(TransportHandle {
            transport: Arc::new(transport),
            events,
        })
    }
}

fn register_callbacks(
    pc: &Arc<RTCPeerConnection>,
    peer_id: &PeerId,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
    signaling_tx: &Arc<watch::Sender<SignalingState>>,
    described: &Arc<AtomicBool>,
) {
    let tx = events_tx.clone();
    let id = peer_id.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        let id = id.clone();
        Box::pin(async move {
            let init = match candidate.map(|c| c.to_json()).transpose() {
                Ok(init) => init.map(IceCandidateInit::from),
                Err(e) => {
                    warn!(peer_id = %id, error = %e, "Failed to encode local ICE candidate");
                    return;
                }
            };
            let _ = tx.send(TransportEvent::IceCandidate(init));
        })
    }));

    let tx = events_tx.clone();
    let watch_tx = Arc::clone(signaling_tx);
    pc.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
        let state = SignalingState::from(state);
        watch_tx.send_replace(state);
        let _ = tx.send(TransportEvent::SignalingStateChange(state));
        Box::pin(async {})
    }));

    let tx = events_tx.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let _ = tx.send(TransportEvent::ConnectionStateChange(state.into()));
        Box::pin(async {})
    }));

    let tx = events_tx.clone();
    pc.on_track(Box::new(move |remote, _receiver, _transceiver| {
        let _ = tx.send(TransportEvent::Track(InboundTrack { remote }));
        Box::pin(async {})
    }));

    // Changes made before the first local description are covered by the
    // initial offer. Anything missed is re-detected once the state is stable.
    let tx = events_tx.clone();
    let described = Arc::clone(described);
    let id = peer_id.clone();
    pc.on_negotiation_needed(Box::new(move || {
        if described.load(Ordering::SeqCst) {
            let _ = tx.send(TransportEvent::NegotiationNeeded);
        } else {
            debug!(peer_id = %id, "Negotiation needed before initial offer");
        }
        Box::pin(async {})
    }));
}

/// [`PeerTransport`] backed by an `RTCPeerConnection`
pub struct RtcTransport {
    peer_id: PeerId,
    pc: Arc<RTCPeerConnection>,
    signaling_tx: Arc<watch::Sender<SignalingState>>,
    /// Set once a local description has been applied.
    described: Arc<AtomicBool>,
    /// Serializes sender mutations so a check-then-add never duplicates a track.
    senders_lock: Mutex<()>,
}

impl RtcTransport {
    /// Senders carrying `owner`'s `track_id`. A relayed track's stream id is
    /// its owner, so two owners may reuse a track id without colliding.
    async fn find_senders(
        &self,
        owner: &PeerId,
        track_id: &TrackId,
    ) -> Vec<Arc<webrtc::rtp_transceiver::rtp_sender::RTCRtpSender>> {
        let mut matching = Vec::new();
        for sender in self.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                if track.stream_id() == owner.as_str() && track.id() == track_id.as_str() {
                    matching.push(sender);
                }
            }
        }
        matching
    }

    fn publish_signaling_state(&self) {
        self.signaling_tx
            .send_replace(self.pc.signaling_state().into());
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(self.pc.create_offer(None).await?.try_into()?)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(self.pc.create_answer(None).await?.try_into()?)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(description.try_into()?)
            .await?;
        self.described.store(true, Ordering::SeqCst);
        self.publish_signaling_state();
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(description.try_into()?)
            .await?;
        self.publish_signaling_state();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn add_track(&self, track: &RelayTrack) -> Result<bool> {
        let _guard = self.senders_lock.lock().await;
        if !self.find_senders(&track.owner, &track.id).await.is_empty() {
            return Ok(false);
        }

        let sender = self
            .pc
            .add_track(Arc::clone(track.local()) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Drain inbound RTCP so the interceptors (NACK, reports) keep working.
        let peer_id = self.peer_id.clone();
        let track_id = track.id.clone();
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
            debug!(peer_id = %peer_id, track_id = %track_id, "RTCP reader stopped");
        });

        Ok(true)
    }

    async fn remove_track(&self, owner: &PeerId, track_id: &TrackId) -> Result<usize> {
        let _guard = self.senders_lock.lock().await;
        let senders = self.find_senders(owner, track_id).await;
        for sender in &senders {
            self.pc.remove_track(sender).await?;
        }
        Ok(senders.len())
    }

    async fn sender_tracks(&self) -> Vec<(PeerId, TrackId)> {
        let mut tracks = Vec::new();
        for sender in self.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                tracks.push((PeerId::from(track.stream_id()), TrackId::from(track.id())));
            }
        }
        tracks
    }

    async fn receiver_sources(&self) -> Vec<u32> {
        let mut sources = Vec::new();
        for receiver in self.pc.get_receivers().await {
            for track in receiver.tracks().await {
                let ssrc = track.ssrc();
                if ssrc != 0 {
                    sources.push(ssrc);
                }
            }
        }
        sources
    }

    fn signaling_state(&self) -> SignalingState {
        self.pc.signaling_state().into()
    }

    fn signaling_changes(&self) -> watch::Receiver<SignalingState> {
        self.signaling_tx.subscribe()
    }

    fn connection_state(&self) -> ConnectionState {
        self.pc.connection_state().into()
    }

    async fn write_picture_loss_indication(&self, media_ssrc: u32) -> Result<()> {
        self.pc
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            })])
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        self.signaling_tx.send_replace(SignalingState::Closed);
        Ok(())
    }
}

impl From<RTCSignalingState> for SignalingState {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::Stable => Self::Stable,
            RTCSignalingState::HaveLocalOffer => Self::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => Self::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => Self::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => Self::HaveRemotePranswer,
            RTCSignalingState::Closed => Self::Closed,
            _ => Self::Unknown,
        }
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
            _ => Self::Unknown,
        }
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = Error;

    fn try_from(description: SessionDescription) -> Result<Self> {
        let parsed = match description.sdp_type {
            SdpType::Offer => Self::offer(description.sdp)?,
            SdpType::Answer => Self::answer(description.sdp)?,
            SdpType::Pranswer => Self::pranswer(description.sdp)?,
            SdpType::Rollback => {
                return Err(Error::InvalidMessage(
                    "rollback descriptions are not supported".to_string(),
                ))
            }
        };
        Ok(parsed)
    }
}

impl TryFrom<RTCSessionDescription> for SessionDescription {
    type Error = Error;

    fn try_from(description: RTCSessionDescription) -> Result<Self> {
        let sdp_type = match description.sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
            other => {
                return Err(Error::InvalidState(format!(
                    "engine produced a {other} description"
                )))
            }
        };
        Ok(Self {
            sdp_type,
            sdp: description.sdp,
        })
    }
}

impl From<IceCandidateInit> for RTCIceCandidateInit {
    fn from(candidate: IceCandidateInit) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidateInit {
    fn from(candidate: RTCIceCandidateInit) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}
