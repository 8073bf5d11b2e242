//! ARP (RFC 826): IPv4-to-link-address resolution, with pending-packet
//! queueing for incomplete entries.
//!
//! Grounded on `kernel/src/net/arp.rs`'s cache-entry/state-machine shape;
//! wire layout and REQUEST/REPLY processing follow
//! `original_source/src/arp.c`.

use std::time::{Duration, Instant};

use std::sync::Mutex;

use crate::addr::{Ipv4Addr, MacAddr};
use crate::device::DeviceRegistry;
use crate::error::NetResult;

pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const HTYPE_ETHERNET: u16 = 1;
pub const PTYPE_IPV4: u16 = 0x0800;
const OP_REQUEST: u16 = 1;
const OP_REPLY: u16 = 2;

const TABLE_SIZE: usize = 16;
const MAX_AGE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    Free,
    Incomplete,
    Resolved,
}

pub struct ArpEntry {
    pub state: ArpState,
    pub protocol_addr: Ipv4Addr,
    pub hardware_addr: MacAddr,
    pub device_index: usize,
    pub last_update: Instant,
    pub pending: Option<(Vec<u8>, u16)>,
}

impl Default for ArpEntry {
    fn default() -> Self {
        ArpEntry {
            state: ArpState::Free,
            protocol_addr: Ipv4Addr::ANY,
            hardware_addr: MacAddr::ZERO,
            device_index: 0,
            last_update: Instant::now(),
            pending: None,
        }
    }
}

pub enum Resolution {
    Found(MacAddr),
    Incomplete,
}

/// Resolved outgoing frame the caller should hand to `Device::output` once
/// an entry transitions to RESOLVED.
pub struct FlushedFrame {
    pub dst: MacAddr,
    pub ethertype: u16,
    pub bytes: Vec<u8>,
}

/// Outcome of processing an inbound ARP packet.
pub enum ArpInput {
    /// Nothing to do (malformed, not addressed to us, or a REPLY with no
    /// queued follow-up work).
    None,
    /// A REQUEST addressed to one of our unicasts; send this REPLY frame
    /// unicast to `dst`.
    SendReply { dst: MacAddr, bytes: Vec<u8> },
    /// A REPLY resolved an entry that had a queued datagram; transmit it
    /// now, unicast to the newly resolved hardware address.
    Flush(FlushedFrame),
}

pub struct ArpTable {
    entries: Mutex<Vec<ArpEntry>>,
}

impl Default for ArpTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ArpTable {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(TABLE_SIZE);
        entries.resize_with(TABLE_SIZE, ArpEntry::default);
        ArpTable { entries: Mutex::new(entries) }
    }

    fn find_index(entries: &[ArpEntry], device_index: usize, addr: Ipv4Addr) -> Option<usize> {
        entries.iter().position(|e| {
            e.state != ArpState::Free && e.device_index == device_index && e.protocol_addr == addr
        })
    }

    /// Look up `addr` on `device_index`. If no entry exists, allocates one
    /// (evicting the LRU entry if the table is full), marks it INCOMPLETE,
    /// and broadcasts an ARP request for it via `devices` — `sender_ip`
    /// is the requesting interface's own unicast, carried in the
    /// request's sender-protocol-address field per RFC 826.
    pub fn resolve(&self, devices: &DeviceRegistry, device_index: usize, sender_ip: Ipv4Addr, addr: Ipv4Addr) -> Resolution {
        let mut entries = self.entries.lock().unwrap();
        if let Some(i) = Self::find_index(&entries, device_index, addr) {
            return match entries[i].state {
                ArpState::Resolved => Resolution::Found(entries[i].hardware_addr),
                _ => Resolution::Incomplete,
            };
        }
        let slot = entries
            .iter()
            .position(|e| e.state == ArpState::Free)
            .unwrap_or_else(|| {
                entries
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, e)| e.last_update)
                    .map(|(i, _)| i)
                    .unwrap()
            });
        entries[slot] = ArpEntry {
            state: ArpState::Incomplete,
            protocol_addr: addr,
            device_index,
            last_update: Instant::now(),
            ..ArpEntry::default()
        };
        drop(entries);
        log::debug!("arp: resolving {} on device {}, entry incomplete", addr, device_index);
        if let Some(dev_mutex) = devices.get(device_index) {
            let mut dev = dev_mutex.lock().unwrap();
            let request = Self::build_request(dev.addr, sender_ip, addr);
            if let Err(e) = dev.output(ETHERTYPE_ARP, &request, MacAddr::BROADCAST) {
                log::warn!("arp: failed to transmit request for {}: {}", addr, e);
            }
        }
        Resolution::Incomplete
    }

    /// Stores a pending datagram against the INCOMPLETE entry for
    /// `(device_index, addr)`; replaces any previous pending datagram per
    /// `spec.md`'s "at most one pending datagram" invariant.
    pub fn queue_pending(&self, device_index: usize, addr: Ipv4Addr, ethertype: u16, bytes: Vec<u8>) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(i) = Self::find_index(&entries, device_index, addr) {
            entries[i].pending = Some((bytes, ethertype));
        }
    }

    /// Process an inbound ARP packet. `local_lookup` resolves whether
    /// `addr` is one of the receiving device's interface unicasts.
    pub fn input(&self, device_index: usize, bytes: &[u8], devices: &DeviceRegistry) -> NetResult<ArpInput> {
        let pkt = match ArpPacket::parse(bytes) {
            Some(p) => p,
            None => {
                log::debug!("arp: dropping malformed packet on device {}", device_index);
                return Ok(ArpInput::None);
            }
        };

        match pkt.operation {
            OP_REQUEST => {
                let is_local = {
                    let dev = devices.get(device_index);
                    dev.map(|d| {
                        let d = d.lock().unwrap();
                        d.ifaces.iter().any(|i| i.unicast == pkt.target_proto_addr)
                    })
                    .unwrap_or(false)
                };
                if !is_local {
                    return Ok(ArpInput::None);
                }
                let our_hw = devices.get(device_index).map(|d| d.lock().unwrap().addr).unwrap_or(MacAddr::ZERO);
                let reply = ArpPacket {
                    operation: OP_REPLY,
                    sender_hw_addr: our_hw,
                    sender_proto_addr: pkt.target_proto_addr,
                    target_hw_addr: pkt.sender_hw_addr,
                    target_proto_addr: pkt.sender_proto_addr,
                }
                .build();
                Ok(ArpInput::SendReply { dst: pkt.sender_hw_addr, bytes: reply })
            }
            OP_REPLY => {
                let mut entries = self.entries.lock().unwrap();
                let slot = match Self::find_index(&entries, device_index, pkt.sender_proto_addr) {
                    Some(i) => i,
                    None => entries.iter().position(|e| e.state == ArpState::Free).unwrap_or(0),
                };
                entries[slot].state = ArpState::Resolved;
                entries[slot].protocol_addr = pkt.sender_proto_addr;
                entries[slot].hardware_addr = pkt.sender_hw_addr;
                entries[slot].device_index = device_index;
                entries[slot].last_update = Instant::now();
                log::debug!("arp: resolved {} -> {}", pkt.sender_proto_addr, pkt.sender_hw_addr);
                match entries[slot].pending.take() {
                    Some((queued_bytes, ethertype)) => Ok(ArpInput::Flush(FlushedFrame {
                        dst: pkt.sender_hw_addr,
                        ethertype,
                        bytes: queued_bytes,
                    })),
                    None => Ok(ArpInput::None),
                }
            }
            _ => Ok(ArpInput::None),
        }
    }

    /// Scans for an entry whose `last_update` is older than `MAX_AGE` and
    /// invalidates it. Intended as a timer callback.
    pub fn age(&self) {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        for e in entries.iter_mut() {
            if e.state == ArpState::Resolved && now.duration_since(e.last_update) > MAX_AGE {
                log::debug!("arp: aging out entry for {}", e.protocol_addr);
                *e = ArpEntry::default();
            }
        }
    }

    pub fn build_request(sender_hw: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
        ArpPacket {
            operation: OP_REQUEST,
            sender_hw_addr: sender_hw,
            sender_proto_addr: sender_ip,
            target_hw_addr: MacAddr::ZERO,
            target_proto_addr: target_ip,
        }
        .build()
    }
}

struct ArpPacket {
    operation: u16,
    sender_hw_addr: MacAddr,
    sender_proto_addr: Ipv4Addr,
    target_hw_addr: MacAddr,
    target_proto_addr: Ipv4Addr,
}

impl ArpPacket {
    const LEN: usize = 28;

    fn parse(b: &[u8]) -> Option<Self> {
        if b.len() < Self::LEN {
            return None;
        }
        let htype = u16::from_be_bytes([b[0], b[1]]);
        let ptype = u16::from_be_bytes([b[2], b[3]]);
        let hlen = b[4];
        let plen = b[5];
        if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || hlen != 6 || plen != 4 {
            return None;
        }
        let operation = u16::from_be_bytes([b[6], b[7]]);
        let sender_hw_addr = MacAddr::new(b[8..14].try_into().unwrap());
        let sender_proto_addr = Ipv4Addr::new(b[14], b[15], b[16], b[17]);
        let target_hw_addr = MacAddr::new(b[18..24].try_into().unwrap());
        let target_proto_addr = Ipv4Addr::new(b[24], b[25], b[26], b[27]);
        Some(ArpPacket { operation, sender_hw_addr, sender_proto_addr, target_hw_addr, target_proto_addr })
    }

    fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        out.extend_from_slice(&PTYPE_IPV4.to_be_bytes());
        out.push(6);
        out.push(4);
        out.extend_from_slice(&self.operation.to_be_bytes());
        out.extend_from_slice(self.sender_hw_addr.as_bytes());
        out.extend_from_slice(&self.sender_proto_addr.octets());
        out.extend_from_slice(self.target_hw_addr.as_bytes());
        out.extend_from_slice(&self.target_proto_addr.octets());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_unknown_returns_incomplete_then_resolves_on_reply() {
        let table = ArpTable::new();
        let devices = DeviceRegistry::new();
        let target = Ipv4Addr::new(10, 0, 0, 2);
        let sender_ip = Ipv4Addr::new(10, 0, 0, 1);
        match table.resolve(&devices, 0, sender_ip, target) {
            Resolution::Incomplete => {}
            Resolution::Found(_) => panic!("expected incomplete"),
        }
        let reply = ArpPacket {
            operation: OP_REPLY,
            sender_hw_addr: MacAddr::new([2; 6]),
            sender_proto_addr: target,
            target_hw_addr: MacAddr::ZERO,
            target_proto_addr: Ipv4Addr::new(10, 0, 0, 1),
        }
        .build();
        match table.input(0, &reply, &devices).unwrap() {
            ArpInput::None => {}
            _ => panic!("expected no pending datagram to flush"),
        }
        match table.resolve(&devices, 0, sender_ip, target) {
            Resolution::Found(mac) => assert_eq!(mac, MacAddr::new([2; 6])),
            Resolution::Incomplete => panic!("expected resolved"),
        }
    }

    #[test]
    fn malformed_packet_dropped() {
        let table = ArpTable::new();
        let devices = DeviceRegistry::new();
        match table.input(0, &[0u8; 4], &devices).unwrap() {
            ArpInput::None => {}
            _ => panic!("expected malformed packet to be dropped"),
        }
    }
}
