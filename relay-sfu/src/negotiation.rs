//! Negotiation state machine
//!
//! Drives the offer/answer/candidate exchange for one peer. The signaling
//! state belongs to the transport; this module only queries it and waits on
//! its transitions.
//!
//! Self-initiated offers are serialized by `offer_lock`, held from the wait
//! for a stable state until the offer is applied locally. Requests are
//! coalesced: a request is satisfied by any offer created after it was made,
//! so a burst of negotiation-needed events yields one offer per round trip.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::signaling::{
    IceCandidateInit, MessageType, SessionDescription, SignalingMessage, SignalingSender,
};
use crate::transport::{PeerTransport, SignalingState};
use crate::types::PeerId;

pub struct Negotiator {
    peer_id: PeerId,
    transport: Arc<dyn PeerTransport>,
    signaling: SignalingSender,
    offer_lock: Mutex<()>,
    offers_started: AtomicU64,
}

impl Negotiator {
    #[must_use]
    pub fn new(
        peer_id: PeerId,
        transport: Arc<dyn PeerTransport>,
        signaling: SignalingSender,
    ) -> Self {
        Self {
            peer_id,
            transport,
            signaling,
            offer_lock: Mutex::new(()),
            offers_started: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    #[must_use]
    pub const fn signaling(&self) -> &SignalingSender {
        &self.signaling
    }

    /// Apply one inbound signaling message. An error means the peer's
    /// signaling session must end. A candidate the transport refuses is only
    /// logged; the connection may still succeed through another one.
    pub async fn handle_message(self: &Arc<Self>, message: SignalingMessage) -> Result<()> {
        match message.kind {
            MessageType::IceCandidate => {
                let candidate: IceCandidateInit = message.payload()?;
                if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                    warn!(peer_id = %self.peer_id, error = %e, "Failed to add remote ICE candidate");
                }
                Ok(())
            }
            MessageType::Offer => self.handle_remote_offer(message.payload()?).await,
            MessageType::Answer => {
                let answer: SessionDescription = message.payload()?;
                debug!(peer_id = %self.peer_id, "Applying remote answer");
                self.transport.set_remote_description(answer).await
            }
            MessageType::NegotiationNeeded => {
                debug!(peer_id = %self.peer_id, "Client requested renegotiation");
                self.request_offer();
                Ok(())
            }
        }
    }

    /// Schedule an offer once the signaling state is stable. Runs on its own
    /// task so the caller can keep reading the answer that unblocks it.
    pub fn request_offer(self: &Arc<Self>) -> JoinHandle<()> {
        let seen = self.offers_started.load(Ordering::SeqCst);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.negotiate_after(seen).await })
    }

    /// Wait for a stable signaling state, then offer.
    pub async fn negotiate(&self) {
        self.negotiate_after(self.offers_started.load(Ordering::SeqCst))
            .await;
    }

    async fn negotiate_after(&self, seen: u64) {
        let _guard = self.offer_lock.lock().await;

        if self.offers_started.load(Ordering::SeqCst) != seen {
            debug!(peer_id = %self.peer_id, "Offer request already covered by a newer offer");
            return;
        }

        if let Err(e) = self.wait_for_stable().await {
            debug!(peer_id = %self.peer_id, error = %e, "Abandoning offer request");
            return;
        }

        self.offers_started.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.offer().await {
            warn!(peer_id = %self.peer_id, error = %e, "Failed to send offer");
        }
    }

    async fn wait_for_stable(&self) -> Result<()> {
        let mut changes = self.transport.signaling_changes();
        loop {
            match self.transport.signaling_state() {
                SignalingState::Stable => return Ok(()),
                SignalingState::Closed => {
                    return Err(Error::InvalidState("transport closed".to_string()))
                }
                state => {
                    debug!(peer_id = %self.peer_id, ?state, "Waiting for stable signaling state");
                }
            }
            changes.changed().await.map_err(|_| Error::ChannelClosed)?;
        }
    }

    async fn offer(&self) -> Result<()> {
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        self.signaling
            .send_description(MessageType::Offer, &offer)
            .await?;
        info!(peer_id = %self.peer_id, "Sent offer");
        Ok(())
    }

    async fn handle_remote_offer(&self, offer: SessionDescription) -> Result<()> {
        let state = self.transport.signaling_state();
        if state != SignalingState::Stable {
            info!(peer_id = %self.peer_id, ?state, "Dropping remote offer: signaling state not stable");
            return Ok(());
        }
        let Ok(_guard) = self.offer_lock.try_lock() else {
            info!(peer_id = %self.peer_id, "Dropping remote offer: local offer in progress");
            return Ok(());
        };

        self.transport.set_remote_description(offer).await?;
        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        self.signaling
            .send_description(MessageType::Answer, &answer)
            .await?;
        info!(peer_id = %self.peer_id, "Answered remote offer");
        Ok(())
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("peer_id", &self.peer_id)
            .field("offers_started", &self.offers_started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
