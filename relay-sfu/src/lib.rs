//! Relay SFU (Selective Forwarding Unit)
//!
//! Control plane of a minimal WebRTC SFU. Every connected client is a peer;
//! each peer's inbound tracks are relayed to every other connected peer,
//! without re-encoding.
//!
//! ## Architecture
//!
//! - **`PeerRegistry`**: peer id to peer mapping, the single source of truth
//!   for the forwarding topology
//! - **`Forwarder`**: adds relayed tracks to other peers' transports and
//!   retracts them again
//! - **`Negotiator`**: per-peer offer/answer/candidate exchange, driven by the
//!   transport's signaling state
//! - **`KeyframeSolicitor`**: periodic picture-loss-indication sweep
//! - **`PeerSession`**: glue between one signaling connection and the above
//! - **`RtcEngine`**: [`TransportFactory`] backed by the `webrtc` crate
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_sfu::{RtcEngine, Sfu, SfuConfig, SignalingSender};
//!
//! let config = SfuConfig::default();
//! let engine = Arc::new(RtcEngine::new(&config)?);
//! let sfu = Sfu::new(config, engine);
//!
//! let (signaling, outbound) = SignalingSender::channel(64);
//! let session = sfu.connect(signaling).await?;
//! session.run(inbound_frames).await;
//! ```

mod config;
mod error;
mod forwarding;
mod keyframe;
mod negotiation;
mod peer;
mod registry;
mod relay;
mod rtc;
mod session;
mod sfu;
mod signaling;
mod transport;
mod types;

#[cfg(test)]
pub mod test_helpers;

pub use config::SfuConfig;
pub use error::{Error, Result};
pub use forwarding::Forwarder;
pub use keyframe::{KeyframeSolicitor, SweepStats};
pub use negotiation::Negotiator;
pub use peer::Peer;
pub use registry::PeerRegistry;
pub use rtc::{RtcEngine, RtcTransport};
pub use session::PeerSession;
pub use sfu::Sfu;
pub use signaling::{
    IceCandidateInit, MessageType, SdpType, SessionDescription, SignalingMessage, SignalingSender,
};
pub use transport::{
    ConnectionState, InboundTrack, PeerTransport, RelayTrack, SignalingState, TransportEvent,
    TransportFactory, TransportHandle,
};
pub use types::{PeerId, TrackId};
