//! VRRP data types and structures.

use std::fmt;
use std::net::IpAddr;

/// Default advertisement interval (centiseconds)
pub const DEFAULT_ADVERT_INTERVAL: u16 = 100; // 1 second

/// Highest priority a non-owner may use. 255 is reserved for the address
/// owner, which would start as MASTER and bypass the election.
pub const MAX_PRIORITY: u8 = 254;

/// VRRP state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VRRPState {
    /// Initial state - not yet initialized
    Init,
    /// Backup state - monitoring for master failures
    Backup,
    /// Master state - owns the virtual addresses
    Master,
}

impl fmt::Display for VRRPState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VRRPState::Init => write!(f, "INIT"),
            VRRPState::Backup => write!(f, "BACKUP"),
            VRRPState::Master => write!(f, "MASTER"),
        }
    }
}

/// Role change reported by the VRRP daemon for the managed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BecameMaster,
    BecameBackup,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::BecameMaster => write!(f, "MASTER"),
            Transition::BecameBackup => write!(f, "BACKUP"),
        }
    }
}

/// Unicast election settings, used when multicast is unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unicast {
    /// This node's source address for advertisements.
    pub source: IpAddr,
    /// Other members of the election, sorted, never containing `source`.
    pub peers: Vec<IpAddr>,
}

/// Longest interface name the kernel accepts (`IFNAMSIZ` minus the NUL).
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Whether `name` is usable as a Linux interface name.
///
/// Also rejects the characters keepalived treats as syntax, so a valid
/// name can be written into its configuration verbatim.
pub fn is_valid_interface_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_INTERFACE_NAME_LEN
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_graphic() && !matches!(c, '/' | '{' | '}' | '"' | '#' | '!'))
}

/// VRRP instance configuration
///
/// Instances always start in BACKUP with `nopreempt`; neither is
/// configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VRRPConfig {
    /// Instance name as reported back by the daemon
    pub instance: String,

    /// Virtual Router ID (1-255)
    pub vrid: u8,

    /// Priority for this router (1-254)
    pub priority: u8,

    /// Advertisement interval in centiseconds (default 100 = 1 second)
    pub advert_interval: u16,

    /// Network interface for advertisements and traffic, also tracked
    pub interface: String,

    /// Virtual IP addresses to manage
    pub virtual_ips: Vec<IpAddr>,

    /// Unicast peers; `None` means multicast election
    pub unicast: Option<Unicast>,
}

impl Default for VRRPConfig {
    fn default() -> Self {
        Self {
            instance: String::from("lb"),
            vrid: 1,
            priority: 100,
            advert_interval: DEFAULT_ADVERT_INTERVAL,
            interface: String::from("eth0"),
            virtual_ips: Vec::new(),
            unicast: None,
        }
    }
}

impl VRRPConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.vrid == 0 {
            return Err("VRID must be between 1 and 255".to_string());
        }

        if self.priority == 0 || self.priority > MAX_PRIORITY {
            return Err(format!("Priority must be between 1 and {}", MAX_PRIORITY));
        }

        if self.virtual_ips.is_empty() {
            return Err("At least one virtual IP is required".to_string());
        }

        if !is_valid_interface_name(&self.interface) {
            return Err(format!("Invalid interface name {:?}", self.interface));
        }

        if let Some(unicast) = &self.unicast {
            if unicast.peers.is_empty() {
                return Err("Unicast election needs at least one peer besides the source".to_string());
            }
            if unicast.peers.contains(&unicast.source) {
                return Err("Unicast peers must not contain the source address".to_string());
            }
        }

        Ok(())
    }

    /// Advertisement interval in whole seconds, as keepalived expects it.
    pub fn advert_interval_secs(&self) -> u16 {
        (self.advert_interval / 100).max(1)
    }
}
