//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use lb_sync::model::{LoadBalancerSpec, ObjectMeta, VirtualServerSpec, VrrpSpec};
use lb_sync::{
    ClusterMembership, Daemon, DesiredState, DesiredStateStore, MembershipSource, MetricsRegistry,
    Node, ObjectKey, Reconciler, SyncSettings,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn key() -> ObjectKey {
    ObjectKey::new("kube-system", "lb")
}

pub fn node(address: &str, ready: bool) -> Node {
    Node {
        name: format!("node-{}", address),
        address: address.parse().unwrap(),
        ready,
        labels: BTreeMap::new(),
    }
}

pub fn membership(nodes: &[(&str, bool)]) -> ClusterMembership {
    ClusterMembership {
        nodes: nodes.iter().map(|(addr, ready)| node(addr, *ready)).collect(),
    }
}

/// `kube-system/lb`: VIP 10.0.0.5 on eth0, one TCP wrr service over all nodes.
pub fn desired(uid: &str, resource_version: &str) -> DesiredState {
    DesiredState {
        metadata: ObjectMeta {
            namespace: "kube-system".to_string(),
            name: "lb".to_string(),
            uid: uid.to_string(),
            resource_version: resource_version.to_string(),
        },
        spec: LoadBalancerSpec {
            vips: vec!["10.0.0.5".parse().unwrap()],
            interface: "eth0".to_string(),
            vrrp: VrrpSpec {
                virtual_router_id: 50,
                priority: 100,
                unicast_peers: None,
            },
            fwmark: 1,
            virtual_servers: vec![VirtualServerSpec {
                protocol: ipvs::Protocol::TCP,
                scheduler: "wrr".to_string(),
                backend_selector: BTreeMap::new(),
                weights: BTreeMap::new(),
            }],
        },
    }
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<ObjectKey, DesiredState>>,
    failures: AtomicUsize,
    panics: AtomicUsize,
    pub reads: AtomicUsize,
}

impl MemoryStore {
    pub fn put(&self, state: DesiredState) {
        self.objects.lock().unwrap().insert(state.key(), state);
    }

    pub fn delete(&self, key: &ObjectKey) {
        self.objects.lock().unwrap().remove(key);
    }

    /// Fail the next `n` reads.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Panic on the next `n` reads.
    pub fn panic_next(&self, n: usize) {
        self.panics.store(n, Ordering::SeqCst);
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl DesiredStateStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> common::Result<Option<DesiredState>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.panics) {
            panic!("store exploded");
        }
        if take_one(&self.failures) {
            return Err(common::Error::other("store unavailable"));
        }
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }
}

#[derive(Default)]
pub struct MemoryMembership(Mutex<ClusterMembership>);

impl MemoryMembership {
    pub fn set(&self, membership: ClusterMembership) {
        *self.0.lock().unwrap() = membership;
    }
}

#[async_trait]
impl MembershipSource for MemoryMembership {
    async fn snapshot(&self) -> common::Result<ClusterMembership> {
        Ok(self.0.lock().unwrap().clone())
    }
}

/// Records installs and reloads; can be slowed down or made to fail.
#[derive(Default)]
pub struct RecordingDaemon {
    installs: Mutex<Vec<String>>,
    reloads: AtomicUsize,
    install_failures: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl RecordingDaemon {
    pub fn installs(&self) -> Vec<String> {
        self.installs.lock().unwrap().clone()
    }

    pub fn last_install(&self) -> Option<String> {
        self.installs.lock().unwrap().last().cloned()
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn fail_next_installs(&self, n: usize) {
        self.install_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl Daemon for RecordingDaemon {
    async fn install(&self, artifact: &str) -> common::Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if take_one(&self.install_failures) {
            return Err(common::Error::other("disk full"));
        }
        self.installs.lock().unwrap().push(artifact.to_string());
        Ok(())
    }

    async fn reload(&self) -> common::Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub membership: Arc<MemoryMembership>,
    pub daemon: Arc<RecordingDaemon>,
    pub metrics: Arc<MetricsRegistry>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SyncSettings::default())
    }

    pub fn with_settings(settings: SyncSettings) -> Self {
        let store = Arc::new(MemoryStore::default());
        let membership = Arc::new(MemoryMembership::default());
        let daemon = Arc::new(RecordingDaemon::default());
        let metrics = Arc::new(MetricsRegistry::new());
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            membership.clone(),
            daemon.clone(),
            settings,
            metrics.clone(),
        ));
        Self {
            store,
            membership,
            daemon,
            metrics,
            reconciler,
        }
    }
}

/// Real-server addresses listed in a compiled artifact, in order.
pub fn real_servers(artifact: &str) -> Vec<String> {
    artifact
        .lines()
        .filter_map(|line| line.trim().strip_prefix("real_server "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
