//! Test helpers and fixtures for relay-sfu tests
//!
//! [`FakeTransport`] models the parts of a peer connection the SFU relies on:
//! the offer/answer state machine, the sender list, receivers with or
//! without an assigned source, and PLI writes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use crate::error::{Error, Result};
use crate::signaling::{IceCandidateInit, SdpType, SessionDescription, SignalingMessage};
use crate::transport::{
    ConnectionState, PeerTransport, RelayTrack, SignalingState, TransportEvent, TransportFactory,
    TransportHandle,
};
use crate::types::{PeerId, TrackId};

/// Build a VP8 relay track owned by `owner`
pub fn relay_track(id: &str, owner: &PeerId) -> RelayTrack {
    RelayTrack::new(
        TrackId::from(id),
        owner.clone(),
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    )
}

/// Wait for the next outbound signaling message, failing the test after 1s
pub async fn next_message(rx: &mut mpsc::Receiver<SignalingMessage>) -> SignalingMessage {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a signaling message")
        .expect("signaling channel closed")
}

/// Every outbound signaling message queued so far
pub fn drain(rx: &mut mpsc::Receiver<SignalingMessage>) -> Vec<SignalingMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

/// Poll `condition` until it holds, failing the test after 1s
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

struct FakeState {
    senders: Vec<(PeerId, TrackId)>,
    receivers: Vec<Option<u32>>,
    failing_sources: HashSet<u32>,
    plis: Vec<u32>,
    candidates: Vec<IceCandidateInit>,
    reject_candidates: bool,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    offers_created: usize,
    connection: ConnectionState,
    closed: bool,
}

pub struct FakeTransport {
    state: Mutex<FakeState>,
    signaling: watch::Sender<SignalingState>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (signaling, _) = watch::channel(SignalingState::Stable);
        let transport = Arc::new(Self {
            state: Mutex::new(FakeState {
                senders: Vec::new(),
                receivers: Vec::new(),
                failing_sources: HashSet::new(),
                plis: Vec::new(),
                candidates: Vec::new(),
                reject_candidates: false,
                local_description: None,
                remote_description: None,
                offers_created: 0,
                connection: ConnectionState::New,
                closed: false,
            }),
            signaling,
            events,
        });
        (transport, rx)
    }

    fn set_signaling(&self, state: SignalingState) {
        self.signaling.send_replace(state);
        let _ = self.events.send(TransportEvent::SignalingStateChange(state));
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.state.lock().connection = state;
        let _ = self.events.send(TransportEvent::ConnectionStateChange(state));
    }

    /// Emit a locally gathered candidate (or end-of-gathering for `None`).
    pub fn gather(&self, candidate: Option<IceCandidateInit>) {
        let _ = self.events.send(TransportEvent::IceCandidate(candidate));
    }

    pub fn add_receiver(&self, source: Option<u32>) {
        self.state.lock().receivers.push(source);
    }

    pub fn fail_pli_for(&self, source: u32) {
        self.state.lock().failing_sources.insert(source);
    }

    /// Make every later remote candidate fail to apply.
    pub fn reject_candidates(&self) {
        self.state.lock().reject_candidates = true;
    }

    /// Track ids of the current senders, in insertion order
    pub fn senders(&self) -> Vec<TrackId> {
        self.state.lock().senders.iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn sender_keys(&self) -> Vec<(PeerId, TrackId)> {
        self.state.lock().senders.clone()
    }

    pub fn plis(&self) -> Vec<u32> {
        self.state.lock().plis.clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidateInit> {
        self.state.lock().candidates.clone()
    }

    pub fn offers_created(&self) -> usize {
        self.state.lock().offers_created
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local_description.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote_description.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.lock().closed {
            return Err(Error::InvalidState("transport closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.offers_created += 1;
        Ok(SessionDescription::offer(format!(
            "fake-offer-{}",
            state.offers_created
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        if self.signaling_state() != SignalingState::HaveRemoteOffer {
            return Err(Error::InvalidState("no remote offer to answer".to_string()));
        }
        Ok(SessionDescription::answer("fake-answer"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        let next = match (description.sdp_type, self.signaling_state()) {
            (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveLocalOffer,
            (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
            (kind, state) => {
                return Err(Error::InvalidState(format!(
                    "cannot apply local {kind:?} in {state:?}"
                )))
            }
        };
        self.state.lock().local_description = Some(description);
        self.set_signaling(next);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        if description.sdp == "invalid" {
            return Err(Error::InvalidMessage("unparsable SDP".to_string()));
        }
        let next = match (description.sdp_type, self.signaling_state()) {
            (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
            (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (kind, state) => {
                return Err(Error::InvalidState(format!(
                    "cannot apply remote {kind:?} in {state:?}"
                )))
            }
        };
        self.state.lock().remote_description = Some(description);
        self.set_signaling(next);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.reject_candidates {
            return Err(Error::InvalidState("remote candidate rejected".to_string()));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: &RelayTrack) -> Result<bool> {
        self.ensure_open()?;
        {
            let mut state = self.state.lock();
            let key = (track.owner.clone(), track.id.clone());
            if state.senders.contains(&key) {
                return Ok(false);
            }
            state.senders.push(key);
        }
        let _ = self.events.send(TransportEvent::NegotiationNeeded);
        Ok(true)
    }

    async fn remove_track(&self, owner: &PeerId, track_id: &TrackId) -> Result<usize> {
        let mut state = self.state.lock();
        let before = state.senders.len();
        state
            .senders
            .retain(|(sender_owner, id)| sender_owner != owner || id != track_id);
        Ok(before - state.senders.len())
    }

    async fn sender_tracks(&self) -> Vec<(PeerId, TrackId)> {
        self.sender_keys()
    }

    async fn receiver_sources(&self) -> Vec<u32> {
        self.state.lock().receivers.iter().flatten().copied().collect()
    }

    fn signaling_state(&self) -> SignalingState {
        *self.signaling.borrow()
    }

    fn signaling_changes(&self) -> watch::Receiver<SignalingState> {
        self.signaling.subscribe()
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    async fn write_picture_loss_indication(&self, media_ssrc: u32) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed || state.failing_sources.contains(&media_ssrc) {
            return Err(Error::InvalidState(format!("PLI write to {media_ssrc} failed")));
        }
        state.plis.push(media_ssrc);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.connection = ConnectionState::Closed;
        }
        self.signaling.send_replace(SignalingState::Closed);
        Ok(())
    }
}

/// Factory that keeps every transport it creates for later inspection
#[derive(Default)]
pub struct FakeFactory {
    transports: Mutex<HashMap<PeerId, Arc<FakeTransport>>>,
}

impl FakeFactory {
    pub fn get(&self, peer_id: &PeerId) -> Arc<FakeTransport> {
        Arc::clone(
            self.transports
                .lock()
                .get(peer_id)
                .expect("no transport created for peer"),
        )
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(&self, peer_id: &PeerId) -> Result<TransportHandle> {
        let (transport, events) = FakeTransport::new();
        self.transports
            .lock()
            .insert(peer_id.clone(), Arc::clone(&transport));
        Ok(TransportHandle { transport, events })
    }
}
