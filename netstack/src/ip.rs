//! IPv4: header parse/build, routing table, input validation, and output
//! through ARP.
//!
//! Grounded on `kernel/src/net/ipv4.rs` for module shape and on
//! `original_source/src/ip.c` for exact validation/route-lookup/output
//! semantics.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::addr::Ipv4Addr;
use crate::arp::{ArpInput, ArpTable, Resolution};
use crate::checksum::cksum16;
use crate::device::{DeviceFlags, DeviceRegistry, Ipv4Interface};
use crate::error::{NetError, NetResult};

pub const ETHERTYPE_IPV4: u16 = 0x0800;

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

const HEADER_LEN: usize = 20;
const DEFAULT_TTL: u8 = 255;

/// A parsed IPv4 datagram header plus a view of its payload.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Header {
    pub ihl: u8,
    pub total_len: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    /// Validates and parses the header at the front of `bytes`. Rejects
    /// truncated buffers, non-IPv4 versions, inconsistent header/total
    /// lengths, bad checksums, and fragments (MF set or nonzero offset).
    pub fn parse(bytes: &[u8]) -> Result<(Self, &[u8]), NetError> {
        if bytes.len() < HEADER_LEN {
            return Err(NetError::Malformed);
        }
        let version = bytes[0] >> 4;
        let ihl = bytes[0] & 0x0F;
        let hlen = ihl as usize * 4;
        if version != 4 || hlen < HEADER_LEN {
            return Err(NetError::Malformed);
        }
        let total_len = u16::from_be_bytes([bytes[2], bytes[3]]);
        if hlen >= total_len as usize || (total_len as usize) > bytes.len() {
            return Err(NetError::Malformed);
        }
        let flags_frag = u16::from_be_bytes([bytes[6], bytes[7]]);
        let more_fragments = flags_frag & 0x2000 != 0;
        let frag_offset = flags_frag & 0x1FFF;
        if more_fragments || frag_offset != 0 {
            return Err(NetError::Malformed);
        }
        if cksum16(&bytes[..hlen], 0) != 0 {
            return Err(NetError::Malformed);
        }
        let ttl = bytes[8];
        let protocol = bytes[9];
        let src = Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]);
        let dst = Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]);
        let header = Ipv4Header { ihl, total_len, ttl, protocol, src, dst };
        Ok((header, &bytes[hlen..total_len as usize]))
    }

    fn build(total_len: u16, id: u16, ttl: u8, protocol: u8, src: Ipv4Addr, dst: Ipv4Addr) -> [u8; HEADER_LEN] {
        let mut h = [0u8; HEADER_LEN];
        h[0] = 0x45;
        h[1] = 0;
        h[2..4].copy_from_slice(&total_len.to_be_bytes());
        h[4..6].copy_from_slice(&id.to_be_bytes());
        h[6..8].copy_from_slice(&0u16.to_be_bytes());
        h[8] = ttl;
        h[9] = protocol;
        h[12..16].copy_from_slice(&src.octets());
        h[16..20].copy_from_slice(&dst.octets());
        let c = cksum16(&h, 0);
        h[10..12].copy_from_slice(&c.to_be_bytes());
        h
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub network: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub device_index: usize,
}

pub type IpHandler = Box<dyn Fn(usize, Ipv4Addr, Ipv4Addr, &[u8]) + Send + Sync>;

/// What `ip_output` needs the caller to do once a next-hop's link address
/// is known. ARP-pending is non-fatal: the caller (typically TCP's
/// retransmit path) retries later.
pub enum OutputOutcome {
    Sent,
    ArpPending,
}

pub struct Ip {
    routes: RwLock<Vec<Route>>,
    protocols: RwLock<HashMap<u8, IpHandler>>,
    next_id: Mutex<u16>,
}

impl Default for Ip {
    fn default() -> Self {
        Self::new()
    }
}

impl Ip {
    pub fn new() -> Self {
        Ip { routes: RwLock::new(Vec::new()), protocols: RwLock::new(HashMap::new()), next_id: Mutex::new(1) }
    }

    pub fn register_protocol(&self, protocol: u8, handler: IpHandler) -> NetResult<()> {
        let mut protocols = self.protocols.write().unwrap();
        if protocols.contains_key(&protocol) {
            return Err(NetError::PortInUse);
        }
        protocols.insert(protocol, handler);
        Ok(())
    }

    /// Adds the on-link route implied by registering `iface` on a device.
    pub fn add_onlink_route(&self, iface: &Ipv4Interface) {
        let mut routes = self.routes.write().unwrap();
        routes.push(Route {
            network: iface.network(),
            netmask: iface.netmask,
            next_hop: Ipv4Addr::ANY,
            device_index: iface.device_index,
        });
    }

    pub fn set_default_gateway(&self, device_index: usize, gateway: Ipv4Addr) {
        let mut routes = self.routes.write().unwrap();
        routes.push(Route { network: Ipv4Addr::ANY, netmask: Ipv4Addr::ANY, next_hop: gateway, device_index });
    }

    /// Longest-prefix match, tie-broken by raw netmask comparison (a
    /// larger netmask value is always the longer prefix).
    pub fn route_lookup(&self, dst: Ipv4Addr) -> Option<Route> {
        let routes = self.routes.read().unwrap();
        routes
            .iter()
            .filter(|r| dst.mask(r.netmask) == r.network)
            .max_by_key(|r| r.netmask.to_bits())
            .copied()
    }

    fn next_identification(&self) -> u16 {
        let mut id = self.next_id.lock().unwrap();
        let v = *id;
        *id = id.wrapping_add(1);
        v
    }

    /// `spec.md` §4.3 `Output`: validates source/route/MTU, builds the
    /// header, resolves the next-hop link address (via ARP, broadcast, or
    /// zero-filled for point-to-point), and hands off to `Device::output`.
    #[allow(clippy::too_many_arguments)]
    pub fn output(
        &self,
        devices: &DeviceRegistry,
        arp: &ArpTable,
        protocol: u8,
        payload: &[u8],
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> NetResult<OutputOutcome> {
        if src.is_unspecified() && dst.is_broadcast() {
            return Err(NetError::SourceRequired);
        }
        let route = self.route_lookup(dst).ok_or(NetError::NoRoute)?;
        let dev_mutex = devices.get(route.device_index).ok_or(NetError::NoRoute)?;

        let (resolved_src, broadcast_addr, needs_arp, mtu) = {
            let dev = dev_mutex.lock().unwrap();
            let iface = dev.ifaces.iter().find(|i| i.device_index == route.device_index);
            let resolved_src = if src.is_unspecified() {
                iface.map(|i| i.unicast).unwrap_or(src)
            } else {
                match iface {
                    Some(i) if i.unicast == src => src,
                    _ => return Err(NetError::BadSource),
                }
            };
            (resolved_src, iface.map(|i| i.broadcast), dev.flags.contains(DeviceFlags::NEED_ARP), dev.mtu)
        };

        if payload.len() + HEADER_LEN > mtu as usize {
            return Err(NetError::TooLong);
        }

        let total_len = (HEADER_LEN + payload.len()) as u16;
        let id = self.next_identification();
        let header = Ipv4Header::build(total_len, id, DEFAULT_TTL, protocol, resolved_src, dst);
        let mut frame = Vec::with_capacity(total_len as usize);
        frame.extend_from_slice(&header);
        frame.extend_from_slice(payload);

        let next_hop = if route.next_hop.is_unspecified() { dst } else { route.next_hop };
        let is_broadcast = Some(next_hop) == broadcast_addr || next_hop.is_broadcast();

        let link_dst = if !needs_arp {
            crate::addr::MacAddr::ZERO
        } else if is_broadcast {
            crate::addr::MacAddr::BROADCAST
        } else {
            match arp.resolve(devices, route.device_index, resolved_src, next_hop) {
                Resolution::Found(mac) => mac,
                Resolution::Incomplete => {
                    arp.queue_pending(route.device_index, next_hop, ETHERTYPE_IPV4, frame);
                    return Ok(OutputOutcome::ArpPending);
                }
            }
        };

        let mut dev = dev_mutex.lock().unwrap();
        dev.output(ETHERTYPE_IPV4, &frame, link_dst)?;
        Ok(OutputOutcome::Sent)
    }

    /// `spec.md` §4.3 `Input`: validates the header (see
    /// `Ipv4Header::parse`), selects the receiving interface, checks the
    /// destination is addressed to us, and dispatches by protocol number.
    pub fn input(&self, device_index: usize, bytes: &[u8], devices: &DeviceRegistry) {
        let (header, payload) = match Ipv4Header::parse(bytes) {
            Ok(v) => v,
            Err(_) => {
                log::debug!("ip: dropping malformed/fragmented datagram from device {}", device_index);
                return;
            }
        };

        let addressed_to_us = match devices.get(device_index) {
            Some(dev) => {
                let dev = dev.lock().unwrap();
                dev.ifaces.iter().any(|i| {
                    header.dst == i.unicast || header.dst == i.broadcast || header.dst.is_broadcast()
                })
            }
            None => false,
        };
        if !addressed_to_us {
            log::debug!("ip: dropping datagram not addressed to any local interface");
            return;
        }

        let protocols = self.protocols.read().unwrap();
        match protocols.get(&header.protocol) {
            Some(handler) => handler(device_index, header.src, header.dst, payload),
            None => log::debug!("ip: no handler registered for protocol {}", header.protocol),
        }
    }

    /// Processes an ARP outcome that resulted from resolving a queued
    /// datagram, transmitting it now that the next hop is known.
    pub fn flush_arp(&self, devices: &DeviceRegistry, device_index: usize, flushed: crate::arp::FlushedFrame) {
        if let Some(dev) = devices.get(device_index) {
            let mut dev = dev.lock().unwrap();
            if let Err(e) = dev.output(flushed.ethertype, &flushed.bytes, flushed.dst) {
                log::warn!("ip: failed to flush arp-pending datagram: {}", e);
            }
        }
    }

    /// Runs ARP input processing and, for REQUEST, transmits the reply;
    /// for REPLY, flushes any datagram that had been queued for the
    /// resolved address.
    pub fn handle_arp_frame(&self, device_index: usize, bytes: &[u8], devices: &DeviceRegistry, arp: &ArpTable) {
        match arp.input(device_index, bytes, devices) {
            Ok(ArpInput::SendReply { dst, bytes }) => {
                if let Some(dev) = devices.get(device_index) {
                    let mut dev = dev.lock().unwrap();
                    let _ = dev.output(crate::arp::ETHERTYPE_ARP, &bytes, dst);
                }
            }
            Ok(ArpInput::Flush(frame)) => self.flush_arp(devices, device_index, frame),
            Ok(ArpInput::None) => {}
            Err(e) => log::debug!("arp: input error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_match() {
        let ip = Ip::new();
        ip.routes.write().unwrap().push(Route {
            network: Ipv4Addr::new(10, 0, 0, 0),
            netmask: Ipv4Addr::new(255, 0, 0, 0),
            next_hop: Ipv4Addr::new(1, 1, 1, 1),
            device_index: 0,
        });
        ip.routes.write().unwrap().push(Route {
            network: Ipv4Addr::new(10, 1, 2, 0),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            next_hop: Ipv4Addr::new(2, 2, 2, 2),
            device_index: 1,
        });
        ip.routes.write().unwrap().push(Route {
            network: Ipv4Addr::ANY,
            netmask: Ipv4Addr::ANY,
            next_hop: Ipv4Addr::new(3, 3, 3, 3),
            device_index: 2,
        });

        assert_eq!(ip.route_lookup(Ipv4Addr::new(10, 1, 2, 5)).unwrap().next_hop, Ipv4Addr::new(2, 2, 2, 2));
        assert_eq!(ip.route_lookup(Ipv4Addr::new(10, 5, 6, 7)).unwrap().next_hop, Ipv4Addr::new(1, 1, 1, 1));
        assert_eq!(ip.route_lookup(Ipv4Addr::new(8, 8, 8, 8)).unwrap().next_hop, Ipv4Addr::new(3, 3, 3, 3));
    }

    #[test]
    fn header_round_trip_checksum_is_zero() {
        let h = Ipv4Header::build(40, 7, 64, PROTO_TCP, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(cksum16(&h, 0), 0);
    }

    #[test]
    fn parse_rejects_truncated() {
        assert!(Ipv4Header::parse(&[0x45, 0, 0, 20]).is_err());
    }
}
