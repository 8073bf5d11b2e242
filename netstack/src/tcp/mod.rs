//! TCP: per-connection control blocks, RFC 793 state machine,
//! retransmission queue, sliding-window send path, and blocking user
//! commands.
//!
//! Grounded on `kernel/src/net/tcp.rs` for the PCB-table shape and on
//! `original_source/src/tcp.c` for `tcp_segment_arrives` /
//! `tcp_output` / `tcp_retransmit_queue_*` / `tcp_timer` /
//! `tcp_open_rfc793` / `tcp_close` / `tcp_send` / `tcp_receive`.

mod header;

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::addr::{Endpoint, Ipv4Addr};
use crate::arp::ArpTable;
use crate::device::DeviceRegistry;
use crate::error::{NetError, NetResult};
use crate::ip::{Ip, PROTO_TCP};
use crate::wait::WaitContext;

use header::{Flags, Segment, HEADER_LEN as TCP_HEADER_LEN};

const POOL_SIZE: usize = 16;
const RECV_BUF_SIZE: usize = 65535;
const INITIAL_RTO: Duration = Duration::from_millis(200);
const RETRANSMIT_DEADLINE: Duration = Duration::from_secs(12);
const IP_HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    CloseWait,
    LastAck,
}

struct RetransmitEntry {
    first_tx: Instant,
    last_tx: Instant,
    rto: Duration,
    seq: u32,
    flags: Flags,
    bytes: Vec<u8>,
}

impl RetransmitEntry {
    fn covers_upto(&self) -> u32 {
        let len = self.bytes.len() as u32
            + self.flags.contains(Flags::SYN) as u32
            + self.flags.contains(Flags::FIN) as u32;
        self.seq.wrapping_add(len)
    }
}

struct TcpPcb {
    state: TcpState,
    local: Endpoint,
    foreign: Endpoint,
    device_index: usize,
    mss: u16,

    iss: u32,
    snd_una: u32,
    snd_nxt: u32,
    snd_wnd: u16,
    snd_wl1: u32,
    snd_wl2: u32,

    irs: u32,
    rcv_nxt: u32,
    rcv_wnd: u16,

    recv_buffer: Vec<u8>,

    retransmit_queue: VecDeque<RetransmitEntry>,
    wait: WaitContext,
    open_failed: bool,
}

impl Default for TcpPcb {
    fn default() -> Self {
        TcpPcb {
            state: TcpState::Closed,
            local: Endpoint::ANY,
            foreign: Endpoint::ANY,
            device_index: 0,
            mss: 536,
            iss: 0,
            snd_una: 0,
            snd_nxt: 0,
            snd_wnd: 0,
            snd_wl1: 0,
            snd_wl2: 0,
            irs: 0,
            rcv_nxt: 0,
            rcv_wnd: RECV_BUF_SIZE as u16,
            recv_buffer: Vec::new(),
            retransmit_queue: VecDeque::new(),
            wait: WaitContext::new(),
            open_failed: false,
        }
    }
}

fn random_iss() -> u32 {
    rand::thread_rng().gen()
}

/// Sequence-acceptability test from RFC 793 §3.3 ("SEGMENT ARRIVES"),
/// covering the four RCV.WND/SEG.LEN cases.
fn is_acceptable(seg_seq: u32, seg_len: u32, rcv_nxt: u32, rcv_wnd: u32) -> bool {
    if seg_len == 0 && rcv_wnd == 0 {
        return seg_seq == rcv_nxt;
    }
    if seg_len == 0 {
        return in_window(seg_seq, rcv_nxt, rcv_wnd);
    }
    if rcv_wnd == 0 {
        return false;
    }
    in_window(seg_seq, rcv_nxt, rcv_wnd) || in_window(seg_seq.wrapping_add(seg_len - 1), rcv_nxt, rcv_wnd)
}

fn in_window(x: u32, start: u32, len: u32) -> bool {
    x.wrapping_sub(start) < len
}

pub struct TcpTable {
    pcbs: Mutex<Vec<TcpPcb>>,
}

impl Default for TcpTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTable {
    pub fn new() -> Self {
        let mut pcbs = Vec::with_capacity(POOL_SIZE);
        pcbs.resize_with(POOL_SIZE, TcpPcb::default);
        TcpTable { pcbs: Mutex::new(pcbs) }
    }

    /// Interrupts every PCB's wait context. Registered as an `EventBus`
    /// subscriber so shutdown wakes every blocked user command.
    pub fn interrupt_all(&self) {
        let pcbs = self.pcbs.lock().unwrap();
        for pcb in pcbs.iter() {
            pcb.wait.interrupt();
        }
    }

    fn alloc(&self, pcbs: &mut [TcpPcb]) -> NetResult<usize> {
        pcbs.iter().position(|p| p.state == TcpState::Closed).ok_or(NetError::ResourceExhausted)
    }

    /// `spec.md` §4.6.4 `open`: allocates a PCB, then either actively
    /// connects (sends SYN, SYN-SENT) or passively listens, and blocks
    /// until the connection leaves its starting state.
    pub fn open(
        &self,
        local: Endpoint,
        foreign: Option<Endpoint>,
        active: bool,
        ip: &Ip,
        devices: &DeviceRegistry,
        arp: &ArpTable,
    ) -> NetResult<usize> {
        let mut pcbs = self.pcbs.lock().unwrap();
        let id = self.alloc(&mut pcbs)?;
        let route = ip.route_lookup(foreign.map(|f| f.addr).unwrap_or(local.addr));
        let device_index = route.map(|r| r.device_index).unwrap_or(0);
        let mtu = devices.get(device_index).map(|d| d.lock().unwrap().mtu).unwrap_or(1500);
        let mss = mtu.saturating_sub((IP_HEADER_LEN + TCP_HEADER_LEN) as u16);

        pcbs[id] = TcpPcb { local, device_index, mss, ..TcpPcb::default() };

        if active {
            let foreign = foreign.ok_or(NetError::InvalidState)?;
            pcbs[id].foreign = foreign;
            let iss = random_iss();
            pcbs[id].iss = iss;
            pcbs[id].snd_una = iss;
            pcbs[id].snd_nxt = iss.wrapping_add(1);
            pcbs[id].state = TcpState::SynSent;
            self.emit(&mut pcbs[id], Flags::SYN, iss, &[], ip, devices, arp);
        } else {
            pcbs[id].foreign = foreign.unwrap_or(Endpoint::ANY);
            pcbs[id].state = TcpState::Listen;
        }

        let starting_state = pcbs[id].state;
        loop {
            if pcbs[id].state != starting_state {
                break;
            }
            let ctx_ptr: *const WaitContext = &pcbs[id].wait;
            // SAFETY: the PCB slot is stable for this call's lifetime; the
            // guard is released during the wait and reacquired after.
            let ctx = unsafe { &*ctx_ptr };
            pcbs = match ctx.sleep(pcbs) {
                Ok(g) => g,
                Err(e) => {
                    let mut pcbs = self.pcbs.lock().unwrap();
                    pcbs[id] = TcpPcb::default();
                    return Err(e);
                }
            };
        }

        loop {
            match pcbs[id].state {
                TcpState::Established => return Ok(id),
                TcpState::SynReceived => {
                    let ctx_ptr: *const WaitContext = &pcbs[id].wait;
                    let ctx = unsafe { &*ctx_ptr };
                    pcbs = match ctx.sleep(pcbs) {
                        Ok(g) => g,
                        Err(e) => {
                            let mut pcbs = self.pcbs.lock().unwrap();
                            pcbs[id] = TcpPcb::default();
                            return Err(e);
                        }
                    };
                    continue;
                }
                _ => {
                    pcbs[id] = TcpPcb::default();
                    return Err(NetError::OpenFailed);
                }
            }
        }
    }

    /// `spec.md` §4.6.4 `close`: abortive close, sends RST and releases
    /// the PCB. Graceful FIN-based close is out of scope.
    pub fn close(&self, id: usize, ip: &Ip, devices: &DeviceRegistry, arp: &ArpTable) -> NetResult<()> {
        let mut pcbs = self.pcbs.lock().unwrap();
        let pcb = pcbs.get_mut(id).ok_or(NetError::PcbNotFound)?;
        if pcb.state == TcpState::Closed {
            return Err(NetError::PcbNotFound);
        }
        let seq = pcb.snd_nxt;
        self.emit(pcb, Flags::RST, seq, &[], ip, devices, arp);
        self.reset_pcb(pcbs, id);
        Ok(())
    }

    /// Waits for every thread blocked in `pcbs[id].wait` to drain before
    /// overwriting the slot, per `WaitContext::destroy`'s "fails if any
    /// waiter remains" contract — a sleeper reacquires this same mutex on
    /// its way out, so `destroy` cannot succeed until we let go of it.
    fn reset_pcb<'a>(&'a self, mut pcbs: MutexGuard<'a, Vec<TcpPcb>>, id: usize) -> MutexGuard<'a, Vec<TcpPcb>> {
        pcbs[id].wait.interrupt();
        while pcbs[id].wait.destroy().is_err() {
            drop(pcbs);
            std::thread::yield_now();
            pcbs = self.pcbs.lock().unwrap();
            pcbs[id].wait.interrupt();
        }
        pcbs[id] = TcpPcb::default();
        pcbs
    }

    /// `spec.md` §4.6.4 `send`: only valid in ESTABLISHED, capped by MSS
    /// and the current usable window; blocks when the window is zero.
    pub fn send(&self, id: usize, data: &[u8], ip: &Ip, devices: &DeviceRegistry, arp: &ArpTable) -> NetResult<usize> {
        let mut pcbs = self.pcbs.lock().unwrap();
        let mut sent = 0;
        while sent < data.len() {
            {
                let pcb = pcbs.get(id).ok_or(NetError::PcbNotFound)?;
                if pcb.state != TcpState::Established {
                    return Err(NetError::InvalidState);
                }
            }
            let usable = {
                let pcb = &pcbs[id];
                (pcb.snd_wnd as u32).saturating_sub(pcb.snd_nxt.wrapping_sub(pcb.snd_una))
            };
            if usable == 0 {
                let ctx_ptr: *const WaitContext = &pcbs[id].wait;
                let ctx = unsafe { &*ctx_ptr };
                pcbs = match ctx.sleep(pcbs) {
                    Ok(g) => g,
                    Err(_) if sent > 0 => return Ok(sent),
                    Err(e) => return Err(e),
                };
                continue;
            }
            let chunk_len = (data.len() - sent).min(pcbs[id].mss as usize).min(usable as usize);
            let chunk = &data[sent..sent + chunk_len];
            let seq = pcbs[id].snd_nxt;
            let pcb = &mut pcbs[id];
            self.emit(pcb, Flags::ACK | Flags::PSH, seq, chunk, ip, devices, arp);
            pcb.snd_nxt = pcb.snd_nxt.wrapping_add(chunk_len as u32);
            sent += chunk_len;
        }
        Ok(sent)
    }

    /// `spec.md` §4.6.4 `receive`: only valid in ESTABLISHED; blocks
    /// while the receive buffer is empty.
    pub fn receive(&self, id: usize, buf: &mut [u8]) -> NetResult<usize> {
        let mut pcbs = self.pcbs.lock().unwrap();
        loop {
            {
                let pcb = pcbs.get(id).ok_or(NetError::PcbNotFound)?;
                if pcb.state != TcpState::Established && pcb.state != TcpState::CloseWait {
                    return Err(NetError::InvalidState);
                }
                if !pcb.recv_buffer.is_empty() {
                    break;
                }
            }
            let ctx_ptr: *const WaitContext = &pcbs[id].wait;
            let ctx = unsafe { &*ctx_ptr };
            pcbs = ctx.sleep(pcbs)?;
        }
        let pcb = &mut pcbs[id];
        let n = buf.len().min(pcb.recv_buffer.len());
        buf[..n].copy_from_slice(&pcb.recv_buffer[..n]);
        pcb.recv_buffer.drain(..n);
        pcb.rcv_wnd = (RECV_BUF_SIZE - pcb.recv_buffer.len()) as u16;
        Ok(n)
    }

    /// Builds and emits a segment, appending it to the retransmission
    /// queue when it carries a SYN, FIN, or payload bytes.
    fn emit(
        &self,
        pcb: &mut TcpPcb,
        flags: Flags,
        seq: u32,
        data: &[u8],
        ip: &Ip,
        devices: &DeviceRegistry,
        arp: &ArpTable,
    ) {
        let segment = Segment {
            src_port: pcb.local.port,
            dst_port: pcb.foreign.port,
            seq,
            ack: pcb.rcv_nxt,
            flags,
            window: pcb.rcv_wnd,
            payload: data.to_vec(),
        };
        let bytes = segment.build(pcb.local.addr, pcb.foreign.addr);
        if flags.intersects(Flags::SYN | Flags::FIN) || !data.is_empty() {
            pcb.retransmit_queue.push_back(RetransmitEntry {
                first_tx: Instant::now(),
                last_tx: Instant::now(),
                rto: INITIAL_RTO,
                seq,
                flags,
                bytes: bytes.clone(),
            });
        }
        if let Err(e) = ip.output(devices, arp, PROTO_TCP, &bytes, pcb.local.addr, pcb.foreign.addr) {
            log::debug!("tcp: output failed (will retry via retransmit queue if queued): {}", e);
        }
    }

    /// Finds the PCB matching the 4-tuple exactly, falling back to a
    /// LISTEN PCB on the same local endpoint (wildcard-foreign LISTEN
    /// loses to a fully connected 4-tuple, per RFC precedence).
    fn find_pcb(pcbs: &[TcpPcb], local: Endpoint, foreign: Endpoint) -> Option<usize> {
        pcbs.iter()
            .position(|p| p.state != TcpState::Closed && p.local == local && p.foreign == foreign)
            .or_else(|| {
                pcbs.iter().position(|p| p.state == TcpState::Listen && p.local.port == local.port)
            })
    }

    /// `spec.md` §4.6.2: processes an inbound segment per RFC 793
    /// §3.9's "SEGMENT ARRIVES" event.
    pub fn input(
        &self,
        device_index: usize,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        bytes: &[u8],
        ip: &Ip,
        devices: &DeviceRegistry,
        arp: &ArpTable,
    ) {
        if !Segment::verify_checksum(bytes, src, dst) {
            log::debug!("tcp: dropping segment with bad checksum");
            return;
        }
        let seg = match Segment::parse(bytes) {
            Some(s) => s,
            None => {
                log::debug!("tcp: dropping malformed segment");
                return;
            }
        };
        let local = Endpoint::new(dst, seg.dst_port);
        let foreign = Endpoint::new(src, seg.src_port);

        let mut pcbs = self.pcbs.lock().unwrap();
        let id = match Self::find_pcb(&pcbs, local, foreign) {
            Some(id) => id,
            None => {
                if !seg.flags.contains(Flags::RST) {
                    send_stray_reset(local, &seg, src, dst, ip, devices, arp);
                }
                return;
            }
        };

        if pcbs[id].state == TcpState::Listen {
            self.segment_arrives_listen(id, &mut pcbs, foreign, device_index, &seg, ip, devices, arp);
            return;
        }

        self.segment_arrives(id, &mut pcbs, &seg, ip, devices, arp);
    }

    #[allow(clippy::too_many_arguments)]
    fn segment_arrives_listen(
        &self,
        id: usize,
        pcbs: &mut [TcpPcb],
        foreign: Endpoint,
        device_index: usize,
        seg: &Segment,
        ip: &Ip,
        devices: &DeviceRegistry,
        arp: &ArpTable,
    ) {
        if seg.flags.contains(Flags::RST) {
            return;
        }
        if seg.flags.contains(Flags::ACK) {
            send_reset_for_ack(seg, pcbs[id].local, foreign, ip, devices, arp);
            return;
        }
        if !seg.flags.contains(Flags::SYN) {
            return;
        }
        pcbs[id].foreign = foreign;
        pcbs[id].device_index = device_index;
        pcbs[id].rcv_nxt = seg.seq.wrapping_add(1);
        pcbs[id].irs = seg.seq;
        let iss = random_iss();
        pcbs[id].iss = iss;
        pcbs[id].snd_una = iss;
        pcbs[id].snd_nxt = iss.wrapping_add(1);
        pcbs[id].state = TcpState::SynReceived;
        let pcb = &mut pcbs[id];
        self.emit(pcb, Flags::SYN | Flags::ACK, iss, &[], ip, devices, arp);
        pcb.wait.wakeup();
    }

    fn segment_arrives(
        &self,
        id: usize,
        pcbs: &mut [TcpPcb],
        seg: &Segment,
        ip: &Ip,
        devices: &DeviceRegistry,
        arp: &ArpTable,
    ) {
        if pcbs[id].state == TcpState::SynSent {
            self.segment_arrives_syn_sent(id, pcbs, seg, ip, devices, arp);
            return;
        }

        let seg_len = seg.seg_len();
        let acceptable = is_acceptable(seg.seq, seg_len, pcbs[id].rcv_nxt, pcbs[id].rcv_wnd as u32);
        if !acceptable {
            if !seg.flags.contains(Flags::RST) {
                let pcb = &mut pcbs[id];
                let seq = pcb.snd_nxt;
                self.emit(pcb, Flags::ACK, seq, &[], ip, devices, arp);
            }
            return;
        }

        // Skip RST/security/SYN per RFC: this branch covers every state
        // past SYN-SENT/LISTEN, where the RST check is a stub in the
        // original with no real body.

        if pcbs[id].state == TcpState::SynReceived {
            if !seg.flags.contains(Flags::ACK) {
                return;
            }
            if in_window(seg.ack, pcbs[id].snd_una.wrapping_add(1), pcbs[id].snd_nxt.wrapping_sub(pcbs[id].snd_una)) {
                pcbs[id].snd_una = seg.ack;
                pcbs[id].state = TcpState::Established;
                pcbs[id].snd_wnd = seg.window;
                pcbs[id].snd_wl1 = seg.seq;
                pcbs[id].snd_wl2 = seg.ack;
                pcbs[id].wait.wakeup();
            } else {
                let pcb = &mut pcbs[id];
                let seq = pcb.snd_nxt;
                self.emit(pcb, Flags::RST, seq, &[], ip, devices, arp);
                return;
            }
        } else if seg.flags.contains(Flags::ACK) {
            self.process_ack(id, pcbs, seg);
        }

        if !seg.payload.is_empty() && matches!(pcbs[id].state, TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2) {
            let pcb = &mut pcbs[id];
            let available = RECV_BUF_SIZE - pcb.recv_buffer.len();
            let n = seg.payload.len().min(available);
            pcb.recv_buffer.extend_from_slice(&seg.payload[..n]);
            pcb.rcv_nxt = pcb.rcv_nxt.wrapping_add(n as u32);
            pcb.rcv_wnd = (RECV_BUF_SIZE - pcb.recv_buffer.len()) as u16;
            let seq = pcb.snd_nxt;
            self.emit(pcb, Flags::ACK, seq, &[], ip, devices, arp);
            pcb.wait.wakeup();
        }
    }

    fn process_ack(&self, id: usize, pcbs: &mut [TcpPcb], seg: &Segment) {
        let pcb = &mut pcbs[id];
        // Acceptable ACKs lie in (SND.UNA, SND.NXT]; older ACKs are
        // ignored and too-new ones are also ignored here (the general
        // ACK reply above already covers the "way out ahead" case via
        // the sequence-acceptability test on the whole segment).
        if in_window(seg.ack, pcb.snd_una.wrapping_add(1), pcb.snd_nxt.wrapping_sub(pcb.snd_una)) {
            pcb.snd_una = seg.ack;
            while let Some(front) = pcb.retransmit_queue.front() {
                let len = front.covers_upto().wrapping_sub(front.seq);
                let acked = pcb.snd_una.wrapping_sub(front.seq);
                if acked >= len {
                    pcb.retransmit_queue.pop_front();
                } else {
                    break;
                }
            }
            if pcb.snd_wl1 < seg.seq || (pcb.snd_wl1 == seg.seq && pcb.snd_wl2 <= seg.ack) {
                pcb.snd_wnd = seg.window;
                pcb.snd_wl1 = seg.seq;
                pcb.snd_wl2 = seg.ack;
            }
            pcb.wait.wakeup();
        }
    }

    fn segment_arrives_syn_sent(
        &self,
        id: usize,
        pcbs: &mut [TcpPcb],
        seg: &Segment,
        ip: &Ip,
        devices: &DeviceRegistry,
        arp: &ArpTable,
    ) {
        let iss = pcbs[id].iss;
        // Acceptable ACKs lie in (ISS, SND.NXT].
        let acceptable_ack = in_window(seg.ack, iss.wrapping_add(1), pcbs[id].snd_nxt.wrapping_sub(iss));
        if seg.flags.contains(Flags::ACK) && !acceptable_ack {
            let pcb = &mut pcbs[id];
            self.emit(pcb, Flags::RST, seg.ack, &[], ip, devices, arp);
            return;
        }
        if !seg.flags.contains(Flags::SYN) {
            return;
        }
        pcbs[id].rcv_nxt = seg.seq.wrapping_add(1);
        pcbs[id].irs = seg.seq;
        if seg.flags.contains(Flags::ACK) {
            pcbs[id].snd_una = seg.ack;
        }
        if pcbs[id].snd_una != iss {
            pcbs[id].state = TcpState::Established;
            pcbs[id].snd_wnd = seg.window;
            pcbs[id].snd_wl1 = seg.seq;
            pcbs[id].snd_wl2 = seg.ack;
            let una = pcbs[id].snd_una;
            pcbs[id].retransmit_queue.retain(|e| e.covers_upto().wrapping_sub(e.seq) > una.wrapping_sub(e.seq));
            let pcb = &mut pcbs[id];
            let seq = pcb.snd_nxt;
            self.emit(pcb, Flags::ACK, seq, &[], ip, devices, arp);
            pcb.wait.wakeup();
        } else {
            pcbs[id].state = TcpState::SynReceived;
            let pcb = &mut pcbs[id];
            let iss = pcb.iss;
            self.emit(pcb, Flags::SYN | Flags::ACK, iss, &[], ip, devices, arp);
        }
    }

    /// Retransmission timer callback (`spec.md` §4.6.3), fired every
    /// 100 ms by the timer wheel for every PCB with a non-empty queue.
    pub fn retransmit_tick(&self, ip: &Ip, devices: &DeviceRegistry, arp: &ArpTable) {
        let mut pcbs = self.pcbs.lock().unwrap();
        let now = Instant::now();
        let mut i = 0;
        while i < pcbs.len() {
            if pcbs[i].state == TcpState::Closed || pcbs[i].retransmit_queue.is_empty() {
                i += 1;
                continue;
            }
            // The front entry is the oldest; it alone decides the 12s abort.
            let aborted = now.duration_since(pcbs[i].retransmit_queue.front().unwrap().first_tx) >= RETRANSMIT_DEADLINE;
            if aborted {
                log::warn!("tcp: retransmission deadline exceeded, aborting connection");
                pcbs = self.reset_pcb(pcbs, i);
                i += 1;
                continue;
            }
            let (local, foreign) = (pcbs[i].local.addr, pcbs[i].foreign.addr);
            let due: Vec<Vec<u8>> = pcbs[i]
                .retransmit_queue
                .iter_mut()
                .filter(|entry| now >= entry.last_tx + entry.rto)
                .map(|entry| {
                    entry.last_tx = now;
                    entry.rto *= 2;
                    entry.bytes.clone()
                })
                .collect();
            for bytes in due {
                let _ = ip.output(devices, arp, PROTO_TCP, &bytes, local, foreign);
            }
            i += 1;
        }
    }
}

fn send_stray_reset(local: Endpoint, seg: &Segment, src: Ipv4Addr, dst: Ipv4Addr, ip: &Ip, devices: &DeviceRegistry, arp: &ArpTable) {
    let (seq, ack, flags) = if seg.flags.contains(Flags::ACK) {
        (seg.ack, 0, Flags::RST)
    } else {
        (0, seg.seq.wrapping_add(seg.seg_len()), Flags::RST | Flags::ACK)
    };
    let reply = Segment { src_port: local.port, dst_port: seg.src_port, seq, ack, flags, window: 0, payload: vec![] };
    let bytes = reply.build(dst, src);
    let _ = ip.output(devices, arp, PROTO_TCP, &bytes, dst, src);
}

fn send_reset_for_ack(seg: &Segment, local: Endpoint, foreign: Endpoint, ip: &Ip, devices: &DeviceRegistry, arp: &ArpTable) {
    let reply = Segment {
        src_port: local.port,
        dst_port: seg.src_port,
        seq: seg.ack,
        ack: 0,
        flags: Flags::RST,
        window: 0,
        payload: vec![],
    };
    let bytes = reply.build(local.addr, foreign.addr);
    let _ = ip.output(devices, arp, PROTO_TCP, &bytes, local.addr, foreign.addr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_acceptability_basic_cases() {
        assert!(is_acceptable(100, 0, 100, 10));
        assert!(!is_acceptable(90, 0, 100, 10));
        assert!(is_acceptable(105, 1, 100, 10));
        assert!(is_acceptable(100, 0, 100, 0));
        assert!(!is_acceptable(101, 0, 100, 0));
    }

    #[test]
    fn retransmit_entry_covers_data_and_control_bits() {
        let e = RetransmitEntry {
            first_tx: Instant::now(),
            last_tx: Instant::now(),
            rto: INITIAL_RTO,
            seq: 100,
            flags: Flags::SYN,
            bytes: vec![],
        };
        assert_eq!(e.covers_upto(), 101);
    }
}
