//! Netlink communication layer for the neighbor table.
//!
//! The table is read with an `RTM_GETNEIGH` dump covering both address
//! families, and entries are removed with `RTM_DELNEIGH`, which the kernel
//! applies atomically per entry.

use crate::types::{HardwareAddress, NeighborEntry, NeighborState};
use common::{Error, Result};
use netlink_packet_core::{
    NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST, NetlinkDeserializable, NetlinkMessage, NetlinkPayload,
    NetlinkSerializable,
};
use netlink_packet_route::AddressFamily;
use netlink_packet_route::RouteNetlinkMessage;
use netlink_packet_route::neighbour::{
    NeighbourAddress, NeighbourAttribute, NeighbourMessage, NeighbourState,
};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, trace};

/// Receive buffer size; a dump arrives in several datagrams of up to this size.
const RECV_BUFFER_SIZE: usize = 32 * 1024;

/// Netlink socket wrapper for neighbor operations.
pub struct NetlinkSocket {
    socket: Socket,
    sequence: u32,
}

impl NetlinkSocket {
    /// Create a new route netlink socket connected to the kernel.
    pub fn new() -> Result<Self> {
        debug!("Creating netlink socket for neighbor operations");

        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| Error::netlink(format!("Failed to create netlink socket: {}", e)))?;

        socket
            .bind(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink(format!("Failed to bind netlink socket: {}", e)))?;

        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink(format!("Failed to connect netlink socket: {}", e)))?;

        Ok(Self {
            socket,
            sequence: 0,
        })
    }

    /// Get the next sequence number.
    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Dump the IPv4 and IPv6 neighbor tables.
    ///
    /// Entries on interfaces that vanished during the dump are skipped.
    /// Non-Ethernet link-layer addresses are reported as zero.
    pub fn dump_neighbors(&mut self) -> Result<Vec<NeighborEntry>> {
        // AF_UNSPEC selects every family; non-IP entries are filtered below.
        let mut nlmsg = NetlinkMessage::from(RouteNetlinkMessage::GetNeighbour(NeighbourMessage::default()));
        nlmsg.header.flags = NLM_F_REQUEST | NLM_F_DUMP;
        nlmsg.header.sequence_number = self.next_sequence();
        nlmsg.finalize();

        self.send_message(&nlmsg)?;

        let mut names: HashMap<u32, Option<String>> = HashMap::new();
        let mut resolve = |ifindex: u32| {
            names
                .entry(ifindex)
                .or_insert_with(|| {
                    nix::net::if_::if_indextoname(ifindex)
                        .ok()
                        .and_then(|name| name.into_string().ok())
                })
                .clone()
        };

        let mut entries = Vec::new();
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let len = self
                .socket
                .recv(&mut &mut buf[..], 0)
                .map_err(|e| Error::netlink(format!("Failed to receive neighbor dump: {}", e)))?;

            let mut offset = 0;
            while offset < len {
                let message = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buf[offset..len])
                    .map_err(|e| Error::netlink(format!("Failed to parse neighbor dump: {}", e)))?;

                let message_len = message.header.length as usize;
                if message_len == 0 {
                    return Err(Error::netlink("Zero-length message in neighbor dump"));
                }
                // Netlink messages are 4-byte aligned.
                offset += (message_len + 3) & !3;

                match message.payload {
                    NetlinkPayload::Done(_) => {
                        debug!(count = entries.len(), "Dumped neighbor table");
                        return Ok(entries);
                    }
                    NetlinkPayload::Error(err) => {
                        if let Some(code) = err.code {
                            return Err(Error::netlink(format!(
                                "RTM_GETNEIGH failed: {}",
                                std::io::Error::from_raw_os_error(-code.get())
                            )));
                        }
                    }
                    NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewNeighbour(neigh)) => {
                        if let Some(entry) = neighbor_entry(&neigh, &mut resolve) {
                            entries.push(entry);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Delete the neighbor entry for `ip` on interface `ifindex`.
    ///
    /// An entry that is already gone counts as deleted.
    pub fn delete_neighbor(&mut self, ifindex: u32, ip: IpAddr) -> Result<()> {
        let mut neigh = NeighbourMessage::default();
        neigh.header.ifindex = ifindex;
        let destination = match ip {
            IpAddr::V4(v4) => {
                neigh.header.family = AddressFamily::Inet;
                NeighbourAddress::Inet(v4)
            }
            IpAddr::V6(v6) => {
                neigh.header.family = AddressFamily::Inet6;
                NeighbourAddress::Inet6(v6)
            }
        };
        neigh
            .attributes
            .push(NeighbourAttribute::Destination(destination));

        let mut nlmsg = NetlinkMessage::from(RouteNetlinkMessage::DelNeighbour(neigh));
        nlmsg.header.flags = NLM_F_REQUEST | NLM_F_ACK;
        nlmsg.header.sequence_number = self.next_sequence();
        nlmsg.finalize();

        self.send_message(&nlmsg)?;
        let response: NetlinkMessage<RouteNetlinkMessage> = self.receive_message()?;

        match response.payload {
            NetlinkPayload::Error(err) => match err.code {
                None => Ok(()),
                Some(code) if code.get() == -libc::ENOENT => {
                    trace!(ip = %ip, ifindex, "Neighbor already absent");
                    Ok(())
                }
                Some(code) => Err(Error::netlink(format!(
                    "RTM_DELNEIGH {} failed: {}",
                    ip,
                    std::io::Error::from_raw_os_error(-code.get())
                ))),
            },
            _ => Err(Error::netlink("Unexpected netlink response type")),
        }
    }

    /// Send a netlink message.
    fn send_message<T>(&mut self, message: &NetlinkMessage<T>) -> Result<()>
    where
        T: NetlinkSerializable + std::fmt::Debug,
    {
        let mut buf = vec![0u8; message.buffer_len()];
        message.serialize(&mut buf);

        trace!("Sending netlink message: {:?}", message);

        self.socket
            .send(&buf[..], 0)
            .map_err(|e| Error::netlink(format!("Failed to send netlink message: {}", e)))?;

        Ok(())
    }

    /// Receive a netlink message.
    fn receive_message<T>(&mut self) -> Result<NetlinkMessage<T>>
    where
        T: NetlinkDeserializable + std::fmt::Debug,
    {
        let mut buf = vec![0u8; 8192];

        let len = self
            .socket
            .recv(&mut &mut buf[..], 0)
            .map_err(|e| Error::netlink(format!("Failed to receive netlink message: {}", e)))?;

        let message = NetlinkMessage::<T>::deserialize(&buf[..len])
            .map_err(|e| Error::netlink(format!("Failed to parse netlink message: {}", e)))?;

        trace!("Received netlink message: {:?}", message);

        Ok(message)
    }
}

/// Convert one dumped neighbor message.
///
/// Returns `None` for non-IP families, entries without a destination and
/// interfaces `device_name` cannot resolve.
pub(crate) fn neighbor_entry(
    neigh: &NeighbourMessage,
    mut device_name: impl FnMut(u32) -> Option<String>,
) -> Option<NeighborEntry> {
    if !matches!(neigh.header.family, AddressFamily::Inet | AddressFamily::Inet6) {
        return None;
    }

    let mut ip = None;
    let mut hw_address = HardwareAddress::ZERO;
    for attr in &neigh.attributes {
        match attr {
            NeighbourAttribute::Destination(NeighbourAddress::Inet(v4)) => ip = Some(IpAddr::V4(*v4)),
            NeighbourAttribute::Destination(NeighbourAddress::Inet6(v6)) => ip = Some(IpAddr::V6(*v6)),
            NeighbourAttribute::LinkLocalAddress(bytes) => {
                if let Ok(octets) = <[u8; 6]>::try_from(bytes.as_slice()) {
                    hw_address = HardwareAddress(octets);
                }
            }
            _ => {}
        }
    }

    let Some(ip) = ip else {
        trace!(ifindex = neigh.header.ifindex, "Neighbor message without destination");
        return None;
    };
    let Some(device) = device_name(neigh.header.ifindex) else {
        trace!(ip = %ip, ifindex = neigh.header.ifindex, "Neighbor on unknown interface");
        return None;
    };

    Some(NeighborEntry {
        ip,
        hw_address,
        state: neighbor_state(&neigh.header.state),
        device,
    })
}

fn neighbor_state(state: &NeighbourState) -> NeighborState {
    match state {
        NeighbourState::Permanent | NeighbourState::Noarp => NeighborState::Permanent,
        NeighbourState::Incomplete | NeighbourState::Failed | NeighbourState::None => {
            NeighborState::Incomplete
        }
        _ => NeighborState::Complete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(family: AddressFamily, attributes: Vec<NeighbourAttribute>) -> NeighbourMessage {
        let mut neigh = NeighbourMessage::default();
        neigh.header.family = family;
        neigh.header.ifindex = 2;
        neigh.header.state = NeighbourState::Reachable;
        neigh.attributes = attributes;
        neigh
    }

    fn eth0(ifindex: u32) -> Option<String> {
        (ifindex == 2).then(|| "eth0".to_string())
    }

    #[test]
    fn test_ipv4_entry() {
        let neigh = message(
            AddressFamily::Inet,
            vec![
                NeighbourAttribute::Destination(NeighbourAddress::Inet("10.0.0.5".parse().unwrap())),
                NeighbourAttribute::LinkLocalAddress(vec![0x52, 0x54, 0, 0x12, 0x34, 0x56]),
            ],
        );
        let entry = neighbor_entry(&neigh, eth0).unwrap();
        assert_eq!(entry.ip, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(entry.hw_address, HardwareAddress([0x52, 0x54, 0, 0x12, 0x34, 0x56]));
        assert_eq!(entry.state, NeighborState::Complete);
        assert_eq!(entry.device, "eth0");
    }

    #[test]
    fn test_ipv6_entry_with_long_link_address() {
        // IPoIB link-layer addresses are 20 bytes.
        let neigh = message(
            AddressFamily::Inet6,
            vec![
                NeighbourAttribute::Destination(NeighbourAddress::Inet6("fd00::5".parse().unwrap())),
                NeighbourAttribute::LinkLocalAddress(vec![0x80; 20]),
            ],
        );
        let entry = neighbor_entry(&neigh, eth0).unwrap();
        assert_eq!(entry.ip, "fd00::5".parse::<IpAddr>().unwrap());
        assert!(entry.hw_address.is_zero());
    }

    #[test]
    fn test_unresolved_entry_has_zero_address() {
        let mut neigh = message(
            AddressFamily::Inet,
            vec![NeighbourAttribute::Destination(NeighbourAddress::Inet(
                "10.0.0.5".parse().unwrap(),
            ))],
        );
        neigh.header.state = NeighbourState::Incomplete;
        let entry = neighbor_entry(&neigh, eth0).unwrap();
        assert!(entry.hw_address.is_zero());
        assert_eq!(entry.state, NeighborState::Incomplete);
    }

    #[test]
    fn test_skips_unusable_messages() {
        let dest = || NeighbourAttribute::Destination(NeighbourAddress::Inet("10.0.0.5".parse().unwrap()));

        // Bridge FDB entries share the message type.
        assert!(neighbor_entry(&message(AddressFamily::Bridge, vec![dest()]), eth0).is_none());
        assert!(neighbor_entry(&message(AddressFamily::Inet, Vec::new()), eth0).is_none());

        let mut gone = message(AddressFamily::Inet, vec![dest()]);
        gone.header.ifindex = 9;
        assert!(neighbor_entry(&gone, eth0).is_none());
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(neighbor_state(&NeighbourState::Permanent), NeighborState::Permanent);
        assert_eq!(neighbor_state(&NeighbourState::Noarp), NeighborState::Permanent);
        assert_eq!(neighbor_state(&NeighbourState::Failed), NeighborState::Incomplete);
        assert_eq!(neighbor_state(&NeighbourState::Stale), NeighborState::Complete);
        assert_eq!(neighbor_state(&NeighbourState::Delay), NeighborState::Complete);
    }

    #[test]
    fn test_netlink_socket_creation() {
        // Requires a kernel with netlink; skip unless explicitly enabled
        if std::env::var("NEIGHBOR_TEST_ENABLED").is_err() {
            eprintln!("Skipping test_netlink_socket_creation (requires NEIGHBOR_TEST_ENABLED=1)");
            return;
        }

        let mut socket = NetlinkSocket::new().expect("netlink socket");
        assert_eq!(socket.next_sequence(), 1);
    }
}
