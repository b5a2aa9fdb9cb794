//! Keyframe solicitation
//!
//! Forwarded tracks have no keyframe-request path of their own, so a newly
//! attached receiver would show a frozen picture until the publisher happens
//! to send the next keyframe. The solicitor periodically sends a PLI for
//! every receiving track on every peer.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::PeerRegistry;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct KeyframeSolicitor {
    registry: Arc<PeerRegistry>,
    interval: Duration,
}

impl KeyframeSolicitor {
    #[must_use]
    pub const fn new(registry: Arc<PeerRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Send one PLI per (peer, receiving track with an assigned source).
    /// Write failures are logged and the sweep carries on.
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        for peer in self.registry.snapshot() {
            for ssrc in peer.transport().receiver_sources().await {
                match peer.transport().write_picture_loss_indication(ssrc).await {
                    Ok(()) => stats.sent += 1,
                    Err(e) => {
                        stats.failed += 1;
                        warn!(
                            peer_id = %peer.id,
                            ssrc,
                            error = %e,
                            "Failed to request keyframe"
                        );
                    }
                }
            }
        }

        debug!(sent = stats.sent, failed = stats.failed, "Keyframe sweep finished");
        stats
    }

    /// Run a sweep every interval until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; there is nothing to ask for yet.
            ticker.tick().await;
            info!(interval = ?self.interval, "Starting keyframe solicitor");

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }

            info!("Keyframe solicitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::Peer;
    use crate::test_helpers::FakeTransport;
    use crate::types::PeerId;

    fn register(registry: &PeerRegistry, id: &str) -> Arc<FakeTransport> {
        let (transport, _events) = FakeTransport::new();
        registry
            .register(Arc::new(Peer::new(PeerId::from(id), transport.clone())))
            .unwrap();
        transport
    }

    #[tokio::test]
    async fn test_one_pli_per_sourced_track() {
        let registry = Arc::new(PeerRegistry::new());
        let a = register(&registry, "a");
        let b = register(&registry, "b");
        a.add_receiver(Some(1111));
        a.add_receiver(Some(2222));
        a.add_receiver(None);
        b.add_receiver(None);

        let solicitor = KeyframeSolicitor::new(registry, Duration::from_secs(3));
        let stats = solicitor.sweep().await;

        assert_eq!(stats, SweepStats { sent: 2, failed: 0 });
        assert_eq!(a.plis(), vec![1111, 2222]);
        assert!(b.plis().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_sweep() {
        let registry = Arc::new(PeerRegistry::new());
        let a = register(&registry, "a");
        a.add_receiver(Some(1));
        a.add_receiver(Some(2));
        a.add_receiver(Some(3));
        a.fail_pli_for(2);

        let stats = KeyframeSolicitor::new(registry, Duration::from_secs(3))
            .sweep()
            .await;

        assert_eq!(stats, SweepStats { sent: 2, failed: 1 });
        assert_eq!(a.plis(), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_solicitor_sweeps_each_interval() {
        let registry = Arc::new(PeerRegistry::new());
        let a = register(&registry, "a");
        a.add_receiver(Some(42));

        let cancel = CancellationToken::new();
        let handle =
            KeyframeSolicitor::new(registry, Duration::from_secs(3)).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(a.plis(), vec![42, 42]);

        cancel.cancel();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(a.plis().len(), 2);
    }
}
