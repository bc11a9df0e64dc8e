//! Neighbor cache invalidation on VRRP role changes.

use crate::metrics::MetricsRegistry;
use arp::{ArpCacheManager, InvalidationReport, NeighborTable};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vrrp::Transition;

/// Reacts to daemon-reported transitions.
///
/// Only `BecameMaster` touches the neighbor table, and only after the
/// daemon has reported it. Failures are logged; the next transition tries
/// again.
pub struct FailoverHandler<T> {
    arp: Arc<Mutex<ArpCacheManager<T>>>,
    owned_vips: watch::Receiver<Vec<IpAddr>>,
    metrics: Arc<MetricsRegistry>,
}

impl<T: NeighborTable + 'static> FailoverHandler<T> {
    pub fn new(
        arp: ArpCacheManager<T>,
        owned_vips: watch::Receiver<Vec<IpAddr>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            arp: Arc::new(Mutex::new(arp)),
            owned_vips,
            metrics,
        }
    }

    /// Handle one transition. Returns the invalidation report when the
    /// neighbor table was processed.
    pub async fn handle(&self, transition: Transition) -> Option<InvalidationReport> {
        self.metrics.record_transition(&transition.to_string());

        match transition {
            Transition::BecameBackup => {
                debug!("Became BACKUP, nothing to invalidate");
                None
            }
            Transition::BecameMaster => {
                let owned = self.owned_vips.borrow().clone();
                info!(vips = ?owned, "Became MASTER, invalidating neighbor entries");

                let arp = Arc::clone(&self.arp);
                let result = tokio::task::spawn_blocking(move || arp.blocking_lock().invalidate(&owned)).await;

                match result {
                    Ok(Ok(report)) => {
                        self.metrics.record_neighbor_invalidations(report.removed);
                        if report.failed > 0 {
                            self.metrics.record_error("neighbor");
                        }
                        Some(report)
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "Neighbor cache invalidation failed");
                        self.metrics.record_error("neighbor");
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, "Neighbor cache invalidation task failed");
                        self.metrics.record_error("neighbor");
                        None
                    }
                }
            }
        }
    }

    /// Handle transitions from `rx` until cancelled or the sender is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<Transition>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                transition = rx.recv() => match transition {
                    Some(transition) => {
                        self.handle(transition).await;
                    }
                    None => break,
                },
            }
        }
        debug!("Failover handler stopped");
    }
}
