//! Wiring of the synchronization engine.

use crate::compiler::GlobalDefs;
use crate::config::Config;
use crate::controller::Controller;
use crate::daemon::KeepalivedDaemon;
use crate::error::SyncError;
use crate::failover::FailoverHandler;
use crate::http_server::MetricsServer;
use crate::metrics::MetricsRegistry;
use crate::model::{Event, ObjectKey};
use crate::reconciler::{Reconciler, SyncSettings};
use crate::resolver::instance_name;
use crate::source::FileSource;
use arp::{ArpCacheManager, KernelNeighborTable};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vrrp::{Transition, TransitionWatcher};

/// lb-sync server
pub struct LbSyncServer {
    config: Config,
}

impl LbSyncServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until `cancel` fires and every task has drained.
    ///
    /// Fails before starting anything if keepalived, the neighbor table or
    /// the notify FIFO cannot be reached.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
        let config = self.config;
        let target = config.target.key();
        info!(key = %target, "Starting lb-sync");

        let daemon = KeepalivedDaemon::open(&config.keepalived.config_path, &config.keepalived.pid_file).await?;
        let neighbors = KernelNeighborTable::new()
            .map_err(|e| SyncError::Startup(format!("cannot open neighbor table: {}", e)))?;

        let metrics = Arc::new(MetricsRegistry::new());
        let source = Arc::new(FileSource::new(&config.source.path));

        let reconciler = Arc::new(Reconciler::new(
            source.clone(),
            source.clone(),
            Arc::new(daemon),
            SyncSettings {
                node_address: config.node.address,
                global: GlobalDefs {
                    notify_fifo: config.keepalived.notify_fifo.clone(),
                },
            },
            metrics.clone(),
        ));
        let controller = Arc::new(Controller::new(
            target.clone(),
            reconciler.clone(),
            config.reconciler.rate_limiter(),
            metrics.clone(),
        ));

        let watcher = open_transition_watcher(config.keepalived.notify_fifo.as_deref(), &target)?;

        let mut tasks = JoinSet::new();
        let (event_tx, event_rx) = mpsc::channel::<Event>(config.reconciler.event_channel);

        {
            let source = source.clone();
            let interval = config.source.poll_interval;
            let cancel = cancel.clone();
            tasks.spawn(async move { source.watch(interval, event_tx, cancel).await });
        }

        tasks.spawn(controller.run(event_rx, config.reconciler.workers, cancel.clone()));

        if let Some(watcher) = watcher {
            let (transition_tx, transition_rx) = mpsc::channel::<Transition>(16);
            tasks.spawn(watcher.run(transition_tx, cancel.clone()));

            let failover = FailoverHandler::new(
                ArpCacheManager::new(neighbors),
                reconciler.subscribe_owned_vips(),
                metrics.clone(),
            );
            tasks.spawn(failover.run(transition_rx, cancel.clone()));
        }

        if config.metrics.enabled {
            let server = MetricsServer::new(metrics.clone(), config.metrics.listen_addr.clone());
            let metrics_cancel = cancel.clone();
            tasks.spawn(async move {
                if let Err(e) = server.run(metrics_cancel).await {
                    warn!(error = %e, "Metrics server error");
                }
            });
        } else {
            info!("Metrics disabled");
        }

        info!("All tasks spawned, lb-sync running");

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Task failed");
            }
        }

        info!("lb-sync stopped");
        Ok(())
    }
}

/// Open the notify FIFO for `target`'s VRRP instance, if one is configured.
fn open_transition_watcher(
    notify_fifo: Option<&Path>,
    target: &ObjectKey,
) -> Result<Option<TransitionWatcher>, SyncError> {
    let Some(fifo) = notify_fifo else {
        warn!("No notify_fifo configured, failover will not invalidate neighbor entries");
        return Ok(None);
    };
    TransitionWatcher::open(fifo, instance_name(target))
        .map(Some)
        .map_err(|e| SyncError::Startup(format!("cannot open notify FIFO {}: {}", fifo.display(), e)))
}
