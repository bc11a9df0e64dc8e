//! Desired state, cluster membership and change notifications.

use ipvs::Protocol;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

fn default_fwmark() -> u32 {
    1
}

fn default_priority() -> u32 {
    100
}

/// Stable identity of a managed load balancer (namespace + name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Object metadata as delivered by the declarative store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    /// Unique per object instance; a recreated object gets a new one.
    pub uid: String,
    /// Opaque, only ever compared for equality.
    #[serde(default)]
    pub resource_version: String,
}

impl ObjectMeta {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// VRRP election settings of a load balancer.
///
/// Numeric fields are wider than their valid range so that out-of-range
/// values reach validation instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrrpSpec {
    pub virtual_router_id: u32,

    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Explicit election peers; `None` selects multicast.
    #[serde(default)]
    pub unicast_peers: Option<Vec<IpAddr>>,
}

/// One declared virtual server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServerSpec {
    pub protocol: Protocol,

    /// Scheduler name, validated against the recognized set.
    pub scheduler: String,

    /// Node labels that must all match; empty selects every node.
    #[serde(default)]
    pub backend_selector: BTreeMap<String, String>,

    /// Per-node weight overrides.
    #[serde(default)]
    pub weights: BTreeMap<IpAddr, u32>,
}

/// Desired configuration of one virtual-IP group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    #[serde(alias = "virtualIPs")]
    pub vips: Vec<IpAddr>,

    pub interface: String,

    pub vrrp: VrrpSpec,

    #[serde(default = "default_fwmark")]
    pub fwmark: u32,

    #[serde(default)]
    pub virtual_servers: Vec<VirtualServerSpec>,
}

/// A load balancer object as stored in the declarative store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub metadata: ObjectMeta,
    pub spec: LoadBalancerSpec,
}

impl DesiredState {
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

/// A candidate backend node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub address: IpAddr,
    pub ready: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Node {
    /// Whether every selector label is present with the same value.
    pub fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|have| have == v))
    }
}

/// Point-in-time view of the candidate backend nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMembership {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// Notification about a desired-state object.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Added(DesiredState),
    Updated { old: DesiredState, new: DesiredState },
    Deleted(DesiredState),
    /// Deletion observed without the final object state.
    DeletedUnknown {
        key: ObjectKey,
        last_known: Option<DesiredState>,
    },
}

impl ChangeEvent {
    /// Identity the event refers to.
    pub fn key(&self) -> ObjectKey {
        match self {
            ChangeEvent::Added(state) | ChangeEvent::Deleted(state) => state.key(),
            ChangeEvent::Updated { new, .. } => new.key(),
            ChangeEvent::DeletedUnknown { key, .. } => key.clone(),
        }
    }

    /// Unique object token of the object that triggered the event, if known.
    pub fn uid(&self) -> Option<&str> {
        match self {
            ChangeEvent::Added(state) | ChangeEvent::Deleted(state) => Some(&state.metadata.uid),
            ChangeEvent::Updated { new, .. } => Some(&new.metadata.uid),
            ChangeEvent::DeletedUnknown { last_known, .. } => {
                last_known.as_ref().map(|s| s.metadata.uid.as_str())
            }
        }
    }

    /// Periodic resyncs deliver updates whose version did not move.
    pub fn is_resync(&self) -> bool {
        matches!(
            self,
            ChangeEvent::Updated { old, new }
                if old.metadata.resource_version == new.metadata.resource_version
        )
    }
}

/// Everything that can make the controller re-drive a sync.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    DesiredState(ChangeEvent),
    MembershipChanged,
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_deserialize_desired_state() {
        let yaml = r#"
metadata:
  namespace: kube-system
  name: lb
  uid: 1b2c
  resourceVersion: "42"
spec:
  virtualIPs: ["10.0.0.5"]
  interface: eth0
  vrrp:
    virtualRouterId: 50
    unicastPeers: ["10.0.0.2", "10.0.0.3"]
  virtualServers:
    - protocol: TCP
      scheduler: wrr
      backendSelector:
        role: ingress
      weights:
        10.1.0.2: 0
"#;
        let state: DesiredState = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(state.key(), ObjectKey::new("kube-system", "lb"));
        assert_eq!(state.metadata.resource_version, "42");
        assert_eq!(state.spec.fwmark, 1);
        assert_eq!(state.spec.vrrp.priority, 100);
        assert_eq!(state.spec.vrrp.unicast_peers.as_ref().unwrap().len(), 2);

        let vs = &state.spec.virtual_servers[0];
        assert_eq!(vs.protocol, Protocol::TCP);
        assert_eq!(vs.backend_selector.get("role").unwrap(), "ingress");
        assert_eq!(vs.weights.get(&"10.1.0.2".parse().unwrap()), Some(&0));
    }

    #[test]
    fn test_node_selector_matching() {
        let mut n = node("10.1.0.2", true);
        n.labels.insert("role".into(), "ingress".into());

        let mut selector = BTreeMap::new();
        assert!(n.matches(&selector));

        selector.insert("role".into(), "ingress".into());
        assert!(n.matches(&selector));

        selector.insert("zone".into(), "a".into());
        assert!(!n.matches(&selector));
    }

    #[test]
    fn test_change_event_identity() {
        let old = desired("uid-1", "1");
        let new = desired("uid-1", "2");

        let updated = ChangeEvent::Updated {
            old: old.clone(),
            new,
        };
        assert_eq!(updated.uid(), Some("uid-1"));
        assert!(!updated.is_resync());

        let resync = ChangeEvent::Updated {
            old: old.clone(),
            new: old.clone(),
        };
        assert!(resync.is_resync());

        let unknown = ChangeEvent::DeletedUnknown {
            key: old.key(),
            last_known: None,
        };
        assert_eq!(unknown.uid(), None);
        assert_eq!(unknown.key().to_string(), "kube-system/lb");
    }
}
