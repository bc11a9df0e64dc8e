//! Event dispatch and the worker pool draining the work queue.

use crate::error::SyncError;
use crate::metrics::MetricsRegistry;
use crate::model::{ChangeEvent, Event, ObjectKey};
use crate::queue::{RateLimiter, WorkQueue};
use crate::reconciler::Reconciler;
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Routes change notifications for one managed load balancer into the
/// work queue and runs the workers that reconcile it.
pub struct Controller {
    target: ObjectKey,
    queue: Arc<WorkQueue<ObjectKey>>,
    reconciler: Arc<Reconciler>,
    /// uid of the object behind the latest notification, per key.
    triggers: DashMap<ObjectKey, String>,
    metrics: Arc<MetricsRegistry>,
}

impl Controller {
    pub fn new(
        target: ObjectKey,
        reconciler: Arc<Reconciler>,
        limiter: RateLimiter,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            target,
            queue: Arc::new(WorkQueue::new(limiter)),
            reconciler,
            triggers: DashMap::new(),
            metrics,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<ObjectKey>> {
        &self.queue
    }

    /// Enqueue the managed key if `event` concerns it.
    pub async fn handle_event(&self, event: Event) {
        match event {
            Event::DesiredState(change) => {
                let key = change.key();
                if key != self.target {
                    trace!(key = %key, "Ignoring unmanaged load balancer");
                    return;
                }
                if change.is_resync() {
                    trace!(key = %key, "Ignoring resync");
                    return;
                }
                match change.uid() {
                    Some(uid) => {
                        self.triggers.insert(key.clone(), uid.to_string());
                    }
                    None if matches!(change, ChangeEvent::DeletedUnknown { .. }) => {
                        self.triggers.remove(&key);
                    }
                    None => {}
                }
                debug!(key = %key, "Desired state changed");
                self.queue.add(key).await;
            }
            Event::MembershipChanged => {
                debug!(key = %self.target, "Cluster membership changed");
                self.queue.add(self.target.clone()).await;
            }
        }
        self.metrics.set_queue_depth(self.queue.len().await);
    }

    /// Process one key. Returns `false` once the queue is shut down.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        self.metrics.set_queue_depth(self.queue.len().await);

        let trigger = self.triggers.get(&key).map(|uid| uid.value().clone());
        let started = Instant::now();

        let result = AssertUnwindSafe(self.reconciler.sync(&key, trigger.as_deref()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(SyncError::Panicked(panic_message(panic.as_ref()))));

        match result {
            Ok(outcome) => {
                self.metrics.record_sync(outcome.as_str(), started.elapsed());
                self.queue.forget(&key).await;
            }
            Err(e) => {
                self.metrics.record_sync("error", started.elapsed());
                self.metrics.record_error(e.kind());
                if e.is_retryable() {
                    let requeues = self.queue.num_requeues(&key).await;
                    warn!(key = %key, error = %e, requeues, "Sync failed, retrying");
                    self.queue.add_rate_limited(key.clone()).await;
                } else {
                    error!(key = %key, error = %e, "Sync failed, waiting for next update");
                    self.queue.forget(&key).await;
                }
            }
        }

        self.queue.done(&key).await;
        true
    }

    /// Dispatch `events` and run `workers` workers until cancelled.
    ///
    /// On cancellation the queue stops accepting keys, in-flight passes
    /// finish, and every worker is joined before returning.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Event>, workers: usize, cancel: CancellationToken) {
        let workers = workers.max(1);
        info!(key = %self.target, workers, "Starting controller");

        let mut pool = JoinSet::new();
        for id in 0..workers {
            let controller = Arc::clone(&self);
            pool.spawn(async move {
                while controller.process_next().await {}
                debug!(worker = id, "Worker stopped");
            });
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("Event stream closed");
                        break;
                    }
                },
            }
        }

        self.queue.shut_down().await;
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }
        info!(key = %self.target, "Controller stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
