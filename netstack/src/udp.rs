//! UDP: per-port control blocks with receive queues.
//!
//! Grounded on `kernel/src/net/udp.rs` for the PCB-table shape; bind/
//! sendto/recvfrom/close semantics follow `spec.md` §4.5 and
//! `original_source/src/udp.c`.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::addr::{Endpoint, Ipv4Addr};
use crate::arp::ArpTable;
use crate::checksum::{cksum16, pseudo_header_sum};
use crate::device::DeviceRegistry;
use crate::error::{NetError, NetResult};
use crate::ip::{Ip, PROTO_UDP};
use crate::wait::WaitContext;

const POOL_SIZE: usize = 16;
const EPHEMERAL_LO: u16 = 49152;
const EPHEMERAL_HI: u16 = 65535;
const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UdpState {
    Free,
    Open,
    Closing,
}

pub struct UdpPcb {
    state: UdpState,
    local: Endpoint,
    queue: VecDeque<(Endpoint, Vec<u8>)>,
    wait: WaitContext,
}

impl Default for UdpPcb {
    fn default() -> Self {
        UdpPcb { state: UdpState::Free, local: Endpoint::ANY, queue: VecDeque::new(), wait: WaitContext::new() }
    }
}

pub struct UdpTable {
    pcbs: Mutex<Vec<UdpPcb>>,
}

impl Default for UdpTable {
    fn default() -> Self {
        Self::new()
    }
}

impl UdpTable {
    pub fn new() -> Self {
        let mut pcbs = Vec::with_capacity(POOL_SIZE);
        pcbs.resize_with(POOL_SIZE, UdpPcb::default);
        UdpTable { pcbs: Mutex::new(pcbs) }
    }

    pub fn open(&self) -> NetResult<usize> {
        let mut pcbs = self.pcbs.lock().unwrap();
        let id = pcbs.iter().position(|p| p.state == UdpState::Free).ok_or(NetError::ResourceExhausted)?;
        pcbs[id] = UdpPcb { state: UdpState::Open, ..UdpPcb::default() };
        Ok(id)
    }

    pub fn bind(&self, id: usize, local: Endpoint) -> NetResult<()> {
        let mut pcbs = self.pcbs.lock().unwrap();
        let clashes = pcbs.iter().enumerate().any(|(i, p)| {
            i != id
                && p.state == UdpState::Open
                && p.local.port == local.port
                && (p.local.addr.is_unspecified() || local.addr.is_unspecified() || p.local.addr == local.addr)
        });
        if clashes {
            return Err(NetError::PortInUse);
        }
        let pcb = pcbs.get_mut(id).ok_or(NetError::PcbNotFound)?;
        if pcb.state != UdpState::Open {
            return Err(NetError::InvalidState);
        }
        pcb.local = local;
        Ok(())
    }

    fn allocate_ephemeral(pcbs: &[UdpPcb], addr: Ipv4Addr) -> NetResult<u16> {
        for port in EPHEMERAL_LO..=EPHEMERAL_HI {
            let used = pcbs.iter().any(|p| p.state == UdpState::Open && p.local.port == port && p.local.addr == addr);
            if !used {
                return Ok(port);
            }
        }
        Err(NetError::ResourceExhausted)
    }

    pub fn sendto(
        &self,
        id: usize,
        payload: &[u8],
        foreign: Endpoint,
        ip: &Ip,
        devices: &DeviceRegistry,
        arp: &ArpTable,
    ) -> NetResult<()> {
        let (src_addr, src_port) = {
            let mut pcbs = self.pcbs.lock().unwrap();
            if pcbs.get(id).map(|p| p.state) != Some(UdpState::Open) {
                return Err(NetError::PcbNotFound);
            }
            if pcbs[id].local.port == 0 {
                let addr = pcbs[id].local.addr;
                let port = Self::allocate_ephemeral(&pcbs, addr)?;
                pcbs[id].local.port = port;
            }
            let local = pcbs[id].local;
            let addr = if local.addr.is_unspecified() {
                ip.route_lookup(foreign.addr)
                    .and_then(|r| devices.get(r.device_index).map(|d| (r, d)))
                    .and_then(|(r, d)| {
                        d.lock().unwrap().ifaces.iter().find(|i| i.device_index == r.device_index).map(|i| i.unicast)
                    })
                    .unwrap_or(local.addr)
            } else {
                local.addr
            };
            (addr, local.port)
        };

        let segment = build_segment(src_addr, src_port, foreign, payload);
        ip.output(devices, arp, PROTO_UDP, &segment, src_addr, foreign.addr)?;
        Ok(())
    }

    pub fn recvfrom(&self, id: usize, buf: &mut [u8]) -> NetResult<(usize, Endpoint)> {
        let mut pcbs = self.pcbs.lock().unwrap();
        loop {
            {
                let pcb = pcbs.get_mut(id).ok_or(NetError::PcbNotFound)?;
                if pcb.state == UdpState::Free {
                    return Err(NetError::PcbNotFound);
                }
                if let Some((from, data)) = pcb.queue.pop_front() {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    return Ok((n, from));
                }
            }
            let ctx_ptr: *const WaitContext = &pcbs[id].wait;
            // SAFETY: the PCB slot is stable for the lifetime of this call;
            // `sleep` only touches the Condvar/flags, not the PCB's other
            // fields, while the guard is released during the wait.
            let ctx = unsafe { &*ctx_ptr };
            pcbs = match ctx.sleep(pcbs) {
                Ok(g) => g,
                Err(e) => {
                    // This waiter's own `fetch_sub` already ran inside
                    // `sleep`; if `close` deferred on us, we may be the
                    // last one out, so finish releasing the slot here.
                    let mut pcbs = self.pcbs.lock().unwrap();
                    if pcbs[id].state == UdpState::Closing && pcbs[id].wait.destroy().is_ok() {
                        pcbs[id] = UdpPcb::default();
                    }
                    return Err(e);
                }
            };
        }
    }

    /// Delivers a datagram received from the network to the matching PCB.
    pub fn input(&self, src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) {
        if segment.len() < HEADER_LEN {
            log::debug!("udp: dropping undersized segment");
            return;
        }
        if src.is_broadcast() || dst.is_broadcast() {
            log::debug!("udp: dropping segment with broadcast endpoint");
            return;
        }
        let src_port = u16::from_be_bytes([segment[0], segment[1]]);
        let dst_port = u16::from_be_bytes([segment[2], segment[3]]);
        let len = u16::from_be_bytes([segment[4], segment[5]]) as usize;
        if len > segment.len() || len < HEADER_LEN {
            log::debug!("udp: dropping segment with inconsistent length");
            return;
        }
        let checksum = u16::from_be_bytes([segment[6], segment[7]]);
        if checksum != 0 {
            let pseudo = pseudo_header_sum(src, dst, PROTO_UDP, len as u16);
            if cksum16(&segment[..len], pseudo) != 0 {
                log::debug!("udp: dropping segment with bad checksum");
                return;
            }
        }
        let payload = segment[HEADER_LEN..len].to_vec();

        let mut pcbs = self.pcbs.lock().unwrap();
        let target = pcbs.iter().position(|p| {
            p.state == UdpState::Open
                && p.local.port == dst_port
                && (p.local.addr.is_unspecified() || p.local.addr == dst)
        });
        match target {
            Some(i) => {
                pcbs[i].queue.push_back((Endpoint::new(src, src_port), payload));
                pcbs[i].wait.wakeup();
            }
            None => log::debug!("udp: no pcb bound to port {}", dst_port),
        }
    }

    /// Releases PCB `id`. If waiters remain, defers release until the last
    /// one wakes and finds `destroy` now succeeds (see `spec.md` §4.5
    /// `Close`, and `recvfrom`'s post-wake check).
    pub fn close(&self, id: usize) -> NetResult<()> {
        let mut pcbs = self.pcbs.lock().unwrap();
        let pcb = pcbs.get_mut(id).ok_or(NetError::PcbNotFound)?;
        pcb.wait.interrupt();
        if pcb.wait.destroy().is_err() {
            pcb.state = UdpState::Closing;
            return Ok(());
        }
        pcbs[id] = UdpPcb::default();
        Ok(())
    }
}

fn build_segment(src: Ipv4Addr, src_port: u16, dst: Endpoint, payload: &[u8]) -> Vec<u8> {
    let len = (HEADER_LEN + payload.len()) as u16;
    let mut seg = Vec::with_capacity(len as usize);
    seg.extend_from_slice(&src_port.to_be_bytes());
    seg.extend_from_slice(&dst.port.to_be_bytes());
    seg.extend_from_slice(&len.to_be_bytes());
    seg.extend_from_slice(&0u16.to_be_bytes());
    seg.extend_from_slice(payload);
    let pseudo = pseudo_header_sum(src, dst.addr, PROTO_UDP, len);
    let c = cksum16(&seg, pseudo);
    let c = if c == 0 { 0xFFFF } else { c };
    seg[6..8].copy_from_slice(&c.to_be_bytes());
    seg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_rejects_port_clash() {
        let t = UdpTable::new();
        let a = t.open().unwrap();
        let b = t.open().unwrap();
        t.bind(a, Endpoint::new(Ipv4Addr::new(127, 0, 0, 1), 9000)).unwrap();
        assert_eq!(t.bind(b, Endpoint::new(Ipv4Addr::ANY, 9000)), Err(NetError::PortInUse));
    }

    #[test]
    fn input_delivers_to_bound_pcb() {
        let t = UdpTable::new();
        let id = t.open().unwrap();
        t.bind(id, Endpoint::new(Ipv4Addr::ANY, 9000)).unwrap();
        let seg = build_segment(Ipv4Addr::new(10, 0, 0, 1), 4000, Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 9000), b"hi");
        t.input(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), &seg);
        let mut buf = [0u8; 16];
        let (n, from) = t.recvfrom(id, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");
        assert_eq!(from, Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 4000));
    }
}
