//! SFU hub - owns the registry, the forwarding engine and the transport
//! factory, and opens one [`PeerSession`] per signaling connection.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::SfuConfig;
use crate::error::Result;
use crate::forwarding::Forwarder;
use crate::keyframe::KeyframeSolicitor;
use crate::registry::PeerRegistry;
use crate::session::PeerSession;
use crate::signaling::SignalingSender;
use crate::transport::TransportFactory;
use crate::types::PeerId;

pub struct Sfu {
    config: Arc<SfuConfig>,
    registry: Arc<PeerRegistry>,
    forwarder: Forwarder,
    factory: Arc<dyn TransportFactory>,
}

impl Sfu {
    /// Create a new SFU hub
    pub fn new(config: SfuConfig, factory: Arc<dyn TransportFactory>) -> Arc<Self> {
        let registry = Arc::new(PeerRegistry::new());
        let solicitor = KeyframeSolicitor::new(Arc::clone(&registry), config.keyframe_interval());

        info!(
            keyframe_interval_ms = config.keyframe_interval_ms,
            ice_servers = config.ice_servers.len(),
            "SFU initialized"
        );

        Arc::new(Self {
            config: Arc::new(config),
            forwarder: Forwarder::new(Arc::clone(&registry), solicitor),
            registry,
            factory,
        })
    }

    /// Accept a new client: create its transport under a fresh peer id,
    /// register it and send the initial offer over `signaling`.
    pub async fn connect(&self, signaling: SignalingSender) -> Result<PeerSession> {
        let id = PeerId::generate();
        let handle = self.factory.create(&id).await?;
        PeerSession::open(
            id,
            handle,
            &self.registry,
            self.forwarder.clone(),
            signaling,
        )
        .await
    }

    /// Start the periodic keyframe solicitor; it stops when `cancel` fires.
    pub fn start_keyframe_solicitor(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.forwarder.solicitor().clone().spawn(cancel)
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn config(&self) -> &SfuConfig {
        &self.config
    }
}

impl std::fmt::Debug for Sfu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sfu")
            .field("config", &self.config)
            .field("peers", &self.registry.len())
            .finish_non_exhaustive()
    }
}
