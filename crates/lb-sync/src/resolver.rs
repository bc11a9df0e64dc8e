//! Resolution of declared backends against live cluster membership.
//!
//! All functions here are pure; identical input always yields identical,
//! sorted output so that an unchanged cluster compiles to an unchanged
//! artifact.

use crate::model::{ClusterMembership, ObjectKey};
use crate::validation::{ServicePlan, ValidatedSpec};
use ipvs::{DEFAULT_WEIGHT, RealServer, VirtualServer};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use vrrp::{DEFAULT_ADVERT_INTERVAL, Unicast, VRRPConfig};

/// Real servers for one service: ready, selected nodes, deduplicated and
/// sorted by address. No ready node yields an empty list.
pub fn resolve_real_servers(service: &ServicePlan, membership: &ClusterMembership) -> Vec<RealServer> {
    let addresses: BTreeSet<IpAddr> = membership
        .nodes
        .iter()
        .filter(|node| node.ready && node.matches(&service.backend_selector))
        .map(|node| node.address)
        .collect();

    addresses
        .into_iter()
        .map(|address| {
            let weight = service
                .weights
                .get(&address)
                .copied()
                .unwrap_or(DEFAULT_WEIGHT);
            RealServer::new(address, weight)
        })
        .collect()
}

/// Resolve every declared service into a virtual server.
pub fn resolve_virtual_servers(spec: &ValidatedSpec, membership: &ClusterMembership) -> Vec<VirtualServer> {
    let mut servers: BTreeMap<_, VirtualServer> = BTreeMap::new();
    for service in &spec.services {
        servers.insert(
            service.protocol,
            VirtualServer {
                fwmark: spec.fwmark,
                protocol: service.protocol,
                scheduler: service.scheduler,
                real_servers: resolve_real_servers(service, membership),
            },
        );
    }
    servers.into_values().collect()
}

/// Unicast peers excluding this node, sorted and deduplicated.
pub fn resolve_unicast(peers: &[IpAddr], source: IpAddr) -> Unicast {
    let peers: BTreeSet<IpAddr> = peers.iter().copied().filter(|p| *p != source).collect();
    Unicast {
        source,
        peers: peers.into_iter().collect(),
    }
}

/// keepalived instance name for a managed identity.
pub fn instance_name(key: &ObjectKey) -> String {
    format!("{}_{}", key.namespace, key.name)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// VRRP instance for a validated spec. `unicast` is already resolved.
pub fn resolve_vrrp(key: &ObjectKey, spec: &ValidatedSpec, unicast: Option<Unicast>) -> VRRPConfig {
    VRRPConfig {
        instance: instance_name(key),
        vrid: spec.virtual_router_id,
        priority: spec.priority,
        advert_interval: DEFAULT_ADVERT_INTERVAL,
        interface: spec.interface.clone(),
        virtual_ips: spec.vips.clone(),
        unicast,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{desired, node};
    use crate::validation::validate;
    use ipvs::Protocol;

    fn tcp_plan() -> ServicePlan {
        validate(&desired("u", "1")).unwrap().services.remove(0)
    }

    fn addresses(servers: &[RealServer]) -> Vec<String> {
        servers.iter().map(|rs| rs.address.to_string()).collect()
    }

    #[test]
    fn test_only_ready_nodes() {
        let membership = ClusterMembership {
            nodes: vec![node("10.1.0.2", true), node("10.1.0.3", false)],
        };
        let servers = resolve_real_servers(&tcp_plan(), &membership);
        assert_eq!(addresses(&servers), vec!["10.1.0.2"]);
    }

    #[test]
    fn test_sorted_and_deduplicated() {
        let membership = ClusterMembership {
            nodes: vec![
                node("10.1.0.10", true),
                node("10.1.0.2", true),
                node("10.1.0.10", true),
                node("10.1.0.3", true),
            ],
        };
        let servers = resolve_real_servers(&tcp_plan(), &membership);
        assert_eq!(addresses(&servers), vec!["10.1.0.2", "10.1.0.3", "10.1.0.10"]);
        assert!(servers.iter().all(|rs| rs.weight == DEFAULT_WEIGHT && rs.port == 0));
    }

    #[test]
    fn test_no_ready_nodes_is_empty() {
        let membership = ClusterMembership {
            nodes: vec![node("10.1.0.2", false)],
        };
        assert!(resolve_real_servers(&tcp_plan(), &membership).is_empty());
        assert!(resolve_real_servers(&tcp_plan(), &ClusterMembership::default()).is_empty());
    }

    #[test]
    fn test_explicit_weights_and_drain() {
        let mut plan = tcp_plan();
        plan.weights.insert("10.1.0.3".parse().unwrap(), 0);
        plan.weights.insert("10.1.0.2".parse().unwrap(), 5);

        let membership = ClusterMembership {
            nodes: vec![node("10.1.0.2", true), node("10.1.0.3", true)],
        };
        let servers = resolve_real_servers(&plan, &membership);
        assert_eq!(servers[0].weight, 5);
        assert_eq!(servers[1].weight, 0);
        assert!(servers[1].is_drained());
    }

    #[test]
    fn test_selector_filters_nodes() {
        let mut plan = tcp_plan();
        plan.backend_selector.insert("role".into(), "ingress".into());

        let mut ingress = node("10.1.0.3", true);
        ingress.labels.insert("role".into(), "ingress".into());
        let membership = ClusterMembership {
            nodes: vec![node("10.1.0.2", true), ingress],
        };
        assert_eq!(addresses(&resolve_real_servers(&plan, &membership)), vec!["10.1.0.3"]);
    }

    #[test]
    fn test_tcp_and_udp_share_mark_and_backends() {
        let mut state = desired("u", "1");
        let mut udp = state.spec.virtual_servers[0].clone();
        udp.protocol = Protocol::UDP;
        state.spec.virtual_servers.push(udp);
        let spec = validate(&state).unwrap();

        let membership = ClusterMembership {
            nodes: vec![node("10.1.0.2", true)],
        };
        let servers = resolve_virtual_servers(&spec, &membership);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].protocol, Protocol::TCP);
        assert_eq!(servers[1].protocol, Protocol::UDP);
        assert_eq!(servers[0].fwmark, servers[1].fwmark);
        assert_eq!(servers[0].real_servers, servers[1].real_servers);
    }

    #[test]
    fn test_unicast_excludes_self() {
        let peers: Vec<IpAddr> = ["10.0.0.3", "10.0.0.1", "10.0.0.2", "10.0.0.3"]
            .iter()
            .map(|p| p.parse().unwrap())
            .collect();
        let unicast = resolve_unicast(&peers, "10.0.0.1".parse().unwrap());
        assert_eq!(
            unicast.peers,
            vec!["10.0.0.2".parse::<IpAddr>().unwrap(), "10.0.0.3".parse().unwrap()]
        );
    }

    #[test]
    fn test_instance_name() {
        assert_eq!(instance_name(&ObjectKey::new("kube-system", "lb.1")), "kube_system_lb_1");
    }
}
