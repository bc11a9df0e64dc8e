//! Validation of desired state before it reaches the compiler.
//!
//! Everything the compiler consumes is checked here, so compilation itself
//! cannot fail.

use crate::model::{DesiredState, VirtualServerSpec};
use ipvs::{Protocol, Scheduler};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use vrrp::{MAX_INTERFACE_NAME_LEN, MAX_PRIORITY, is_valid_interface_name};

/// Every problem found in one desired-state object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<String>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// A virtual server whose scheduler has been parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePlan {
    pub protocol: Protocol,
    pub scheduler: Scheduler,
    pub backend_selector: BTreeMap<String, String>,
    pub weights: BTreeMap<IpAddr, u32>,
}

/// Desired state that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSpec {
    pub vips: Vec<IpAddr>,
    pub interface: String,
    pub virtual_router_id: u8,
    pub priority: u8,
    pub unicast_peers: Option<Vec<IpAddr>>,
    pub fwmark: u32,
    /// Sorted by protocol.
    pub services: Vec<ServicePlan>,
}

/// Validate a desired-state object, collecting every problem.
pub fn validate(state: &DesiredState) -> Result<ValidatedSpec, ValidationErrors> {
    let spec = &state.spec;
    let mut errors = Vec::new();

    if spec.vips.is_empty() {
        errors.push("at least one virtual IP is required".to_string());
    }
    let mut seen = HashSet::new();
    for vip in &spec.vips {
        if !seen.insert(vip) {
            errors.push(format!("duplicate virtual IP {}", vip));
        }
    }

    if !is_valid_interface_name(&spec.interface) {
        errors.push(format!(
            "interface {:?} is not a valid interface name (1 to {} characters, \
             no whitespace, '/', braces, quotes, '#' or '!')",
            spec.interface, MAX_INTERFACE_NAME_LEN
        ));
    }

    // Zero stands in for a rejected value; it never leaves this function.
    let virtual_router_id = u8::try_from(spec.vrrp.virtual_router_id)
        .ok()
        .filter(|id| *id != 0)
        .unwrap_or_else(|| {
            errors.push(format!(
                "virtualRouterId must be between 1 and 255, got {}",
                spec.vrrp.virtual_router_id
            ));
            0
        });
    let priority = u8::try_from(spec.vrrp.priority)
        .ok()
        .filter(|p| (1..=MAX_PRIORITY).contains(p))
        .unwrap_or_else(|| {
            errors.push(format!(
                "priority must be between 1 and {}, got {}",
                MAX_PRIORITY, spec.vrrp.priority
            ));
            0
        });
    if let Some(peers) = &spec.vrrp.unicast_peers {
        if peers.is_empty() {
            errors.push("unicastPeers must not be empty when set".to_string());
        }
    }

    if spec.fwmark == 0 {
        errors.push("fwmark must be greater than 0".to_string());
    }

    if spec.virtual_servers.is_empty() {
        errors.push("at least one virtual server is required".to_string());
    }

    let mut protocols = HashSet::new();
    let mut services = Vec::with_capacity(spec.virtual_servers.len());
    for vs in &spec.virtual_servers {
        if !protocols.insert(vs.protocol) {
            errors.push(format!("duplicate virtual server for protocol {}", vs.protocol));
        }
        match plan(vs) {
            Ok(service) => services.push(service),
            Err(e) => errors.push(e),
        }
    }

    if !errors.is_empty() {
        return Err(ValidationErrors(errors));
    }

    services.sort_by_key(|s| s.protocol);

    Ok(ValidatedSpec {
        vips: spec.vips.clone(),
        interface: spec.interface.clone(),
        virtual_router_id,
        priority,
        unicast_peers: spec.vrrp.unicast_peers.clone(),
        fwmark: spec.fwmark,
        services,
    })
}

fn plan(vs: &VirtualServerSpec) -> Result<ServicePlan, String> {
    let scheduler = vs
        .scheduler
        .parse::<Scheduler>()
        .map_err(|_| format!("{} virtual server: unknown scheduler {:?}", vs.protocol, vs.scheduler))?;

    Ok(ServicePlan {
        protocol: vs.protocol,
        scheduler,
        backend_selector: vs.backend_selector.clone(),
        weights: vs.weights.clone(),
    })
}
