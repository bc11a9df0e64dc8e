//! Prometheus metrics for lb-sync.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for sync pass metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SyncLabels {
    /// Outcome (installed, unchanged, deleted, stale, error)
    pub outcome: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error kind (validation, store, install, reload, ...)
    pub kind: String,
}

/// Labels for VRRP transition metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    /// New state (MASTER, BACKUP)
    pub state: String,
}

/// Metrics registry with all lb-sync metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    syncs_total: Family<SyncLabels, Counter>,
    sync_duration_seconds: Histogram,
    reloads_total: Counter,
    sync_errors_total: Family<ErrorLabels, Counter>,
    transitions_total: Family<TransitionLabels, Counter>,
    neighbor_invalidations_total: Counter,
    queue_depth: Gauge,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let syncs_total = Family::<SyncLabels, Counter>::default();
        registry.register(
            "lbsync_syncs",
            "Synchronization passes by outcome",
            syncs_total.clone(),
        );

        // 1ms to ~16s
        let sync_duration_seconds = Histogram::new(exponential_buckets(0.001, 2.0, 15));
        registry.register(
            "lbsync_sync_duration_seconds",
            "Duration of a synchronization pass",
            sync_duration_seconds.clone(),
        );

        let reloads_total = Counter::default();
        registry.register(
            "lbsync_reloads",
            "keepalived reloads triggered",
            reloads_total.clone(),
        );

        let sync_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "lbsync_sync_errors",
            "Failed synchronization passes by error kind",
            sync_errors_total.clone(),
        );

        let transitions_total = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "lbsync_transitions",
            "VRRP transitions reported by keepalived",
            transitions_total.clone(),
        );

        let neighbor_invalidations_total = Counter::default();
        registry.register(
            "lbsync_neighbor_invalidations",
            "Neighbor entries removed after failover",
            neighbor_invalidations_total.clone(),
        );

        let queue_depth = Gauge::default();
        registry.register(
            "lbsync_queue_depth",
            "Keys waiting in the work queue",
            queue_depth.clone(),
        );

        Self {
            registry,
            syncs_total,
            sync_duration_seconds,
            reloads_total,
            sync_errors_total,
            transitions_total,
            neighbor_invalidations_total,
            queue_depth,
        }
    }

    /// Record a finished synchronization pass
    pub fn record_sync(&self, outcome: &str, duration: Duration) {
        self.syncs_total
            .get_or_create(&SyncLabels {
                outcome: outcome.to_string(),
            })
            .inc();
        self.sync_duration_seconds.observe(duration.as_secs_f64());
    }

    pub fn record_reload(&self) {
        self.reloads_total.inc();
    }

    pub fn record_error(&self, kind: &str) {
        self.sync_errors_total
            .get_or_create(&ErrorLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub fn record_transition(&self, state: &str) {
        self.transitions_total
            .get_or_create(&TransitionLabels {
                state: state.to_string(),
            })
            .inc();
    }

    pub fn record_neighbor_invalidations(&self, removed: usize) {
        self.neighbor_invalidations_total.inc_by(removed as u64);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    /// Total reloads so far
    pub fn reloads(&self) -> u64 {
        self.reloads_total.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    fn render(metrics: &MetricsRegistry) -> String {
        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry).unwrap();
        buffer
    }

    #[test]
    fn test_record_sync_and_reload() {
        let metrics = MetricsRegistry::new();
        metrics.record_sync("installed", Duration::from_millis(3));
        metrics.record_sync("unchanged", Duration::from_millis(1));
        metrics.record_reload();

        let text = render(&metrics);
        assert!(text.contains("lbsync_syncs_total{outcome=\"installed\"} 1"));
        assert!(text.contains("lbsync_syncs_total{outcome=\"unchanged\"} 1"));
        assert!(text.contains("lbsync_reloads_total 1"));
        assert!(text.contains("lbsync_sync_duration_seconds_count 2"));
        assert_eq!(metrics.reloads(), 1);
    }

    #[test]
    fn test_errors_transitions_and_neighbors() {
        let metrics = MetricsRegistry::new();
        metrics.record_error("store");
        metrics.record_error("store");
        metrics.record_transition("MASTER");
        metrics.record_neighbor_invalidations(3);
        metrics.set_queue_depth(2);

        let text = render(&metrics);
        assert!(text.contains("lbsync_sync_errors_total{kind=\"store\"} 2"));
        assert!(text.contains("lbsync_transitions_total{state=\"MASTER\"} 1"));
        assert!(text.contains("lbsync_neighbor_invalidations_total 3"));
        assert!(text.contains("lbsync_queue_depth 2"));
    }
}
