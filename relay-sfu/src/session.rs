//! Peer session
//!
//! Glue between one signaling connection and the core: registers the peer,
//! sends the initial offer, pumps transport events and runs the inbound read
//! loop until the connection ends.

use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::forwarding::Forwarder;
use crate::negotiation::Negotiator;
use crate::peer::Peer;
use crate::registry::PeerRegistry;
use crate::relay::spawn_relay;
use crate::signaling::{SignalingMessage, SignalingSender};
use crate::transport::{ConnectionState, InboundTrack, TransportEvent, TransportHandle};
use crate::types::PeerId;

pub struct PeerSession {
    id: PeerId,
    negotiator: Arc<Negotiator>,
    forwarder: Forwarder,
    pump: JoinHandle<()>,
}

impl PeerSession {
    pub(crate) async fn open(
        id: PeerId,
        handle: TransportHandle,
        registry: &PeerRegistry,
        forwarder: Forwarder,
        signaling: SignalingSender,
    ) -> Result<Self> {
        let TransportHandle { transport, events } = handle;

        let peer = Arc::new(Peer::new(id.clone(), Arc::clone(&transport)));
        if let Err(e) = registry.register(peer) {
            if let Err(close_err) = transport.close().await {
                debug!(peer_id = %id, error = %close_err, "Failed to close rejected transport");
            }
            return Err(e);
        }

        info!(peer_id = %id, peers = registry.len(), "Peer connected");

        let negotiator = Arc::new(Negotiator::new(id.clone(), transport, signaling));
        negotiator.negotiate().await;

        let pump = tokio::spawn(pump_events(
            Arc::clone(&negotiator),
            forwarder.clone(),
            events,
        ));

        Ok(Self {
            id,
            negotiator,
            forwarder,
            pump,
        })
    }

    #[must_use]
    pub const fn id(&self) -> &PeerId {
        &self.id
    }

    /// Decode one inbound frame and apply it. An error ends the session.
    pub async fn handle_frame(&self, raw: &str) -> Result<()> {
        let message = SignalingMessage::from_json(raw)?;
        debug!(peer_id = %self.id, kind = ?message.kind, "Received signaling message");
        self.negotiator.handle_message(message).await
    }

    /// Consume inbound frames until the stream ends or a frame fails, then
    /// tear the peer down.
    pub async fn run<S, E>(self, mut inbound: S)
    where
        S: Stream<Item = std::result::Result<String, E>> + Unpin,
        E: Display,
    {
        while let Some(frame) = inbound.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(peer_id = %self.id, error = %e, "Signaling channel error");
                    break;
                }
            };

            if let Err(e) = self.handle_frame(&frame).await {
                warn!(peer_id = %self.id, error = %e, "Ending signaling session");
                break;
            }
        }

        self.close().await;
    }

    pub async fn close(self) {
        self.forwarder.remove_peer(&self.id).await;
        self.pump.abort();
        info!(peer_id = %self.id, "Peer disconnected");
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

async fn pump_events(
    negotiator: Arc<Negotiator>,
    forwarder: Forwarder,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    let peer_id = negotiator.peer_id().clone();
    let mut connected = false;

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::IceCandidate(Some(candidate)) => {
                if let Err(e) = negotiator.signaling().send_candidate(&candidate).await {
                    debug!(peer_id = %peer_id, error = %e, "Dropping local ICE candidate");
                }
            }
            TransportEvent::IceCandidate(None) => {
                debug!(peer_id = %peer_id, "ICE gathering complete");
            }
            TransportEvent::SignalingStateChange(state) => {
                debug!(peer_id = %peer_id, ?state, "Signaling state changed");
            }
            TransportEvent::ConnectionStateChange(ConnectionState::Connected) => {
                info!(peer_id = %peer_id, "Transport connected");
                if !connected {
                    connected = true;
                    forwarder.add_all_tracks(&peer_id).await;
                }
            }
            TransportEvent::ConnectionStateChange(
                state @ (ConnectionState::Failed | ConnectionState::Closed),
            ) => {
                info!(peer_id = %peer_id, ?state, "Transport ended");
            }
            TransportEvent::ConnectionStateChange(state) => {
                debug!(peer_id = %peer_id, ?state, "Connection state changed");
            }
            TransportEvent::Track(InboundTrack { remote }) => {
                spawn_relay(forwarder.clone(), peer_id.clone(), remote);
            }
            TransportEvent::NegotiationNeeded => {
                negotiator.request_offer();
            }
        }
    }

    debug!(peer_id = %peer_id, "Transport event stream ended");
}
