//! TCP segment wire format (RFC 793 §3.1): fixed 20-byte header (no
//! options beyond what's needed to carry MSS sizing implicitly through
//! the link MTU — TCP options are a non-goal), big-endian fields.

use crate::addr::Ipv4Addr;
use crate::checksum::{cksum16, pseudo_header_sum};
use crate::ip::PROTO_TCP;

pub const HEADER_LEN: usize = 20;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
    }
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: Flags,
    pub window: u16,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn seg_len(&self) -> u32 {
        self.payload.len() as u32
            + self.flags.contains(Flags::SYN) as u32
            + self.flags.contains(Flags::FIN) as u32
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let data_offset = (bytes[12] >> 4) as usize * 4;
        if data_offset < HEADER_LEN || data_offset > bytes.len() {
            return None;
        }
        Some(Segment {
            src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
            dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
            seq: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ack: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            flags: Flags::from_bits_truncate(bytes[13]),
            window: u16::from_be_bytes([bytes[14], bytes[15]]),
            payload: bytes[data_offset..].to_vec(),
        })
    }

    pub fn build(&self, src_addr: Ipv4Addr, dst_addr: Ipv4Addr) -> Vec<u8> {
        let total_len = HEADER_LEN + self.payload.len();
        let mut out = vec![0u8; total_len];
        out[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        out[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        out[4..8].copy_from_slice(&self.seq.to_be_bytes());
        out[8..12].copy_from_slice(&self.ack.to_be_bytes());
        out[12] = ((HEADER_LEN / 4) as u8) << 4;
        out[13] = self.flags.bits();
        out[14..16].copy_from_slice(&self.window.to_be_bytes());
        out[18..20].copy_from_slice(&0u16.to_be_bytes());
        out[HEADER_LEN..].copy_from_slice(&self.payload);

        let pseudo = pseudo_header_sum(src_addr, dst_addr, PROTO_TCP, total_len as u16);
        let c = cksum16(&out, pseudo);
        let c = if c == 0 { 0xFFFF } else { c };
        out[16..18].copy_from_slice(&c.to_be_bytes());
        out
    }

    pub fn verify_checksum(bytes: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        let pseudo = pseudo_header_sum(src, dst, PROTO_TCP, bytes.len() as u16);
        cksum16(bytes, pseudo) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_verify_checksum() {
        let seg = Segment {
            src_port: 1000,
            dst_port: 80,
            seq: 1,
            ack: 0,
            flags: Flags::SYN,
            window: 4096,
            payload: vec![],
        };
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let bytes = seg.build(src, dst);
        assert!(Segment::verify_checksum(&bytes, src, dst));
    }

    #[test]
    fn parse_round_trip() {
        let seg = Segment {
            src_port: 1000,
            dst_port: 80,
            seq: 42,
            ack: 7,
            flags: Flags::ACK | Flags::PSH,
            window: 1024,
            payload: b"hi".to_vec(),
        };
        let bytes = seg.build(Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(2, 2, 2, 2));
        let parsed = Segment::parse(&bytes).unwrap();
        assert_eq!(parsed.seq, 42);
        assert_eq!(parsed.ack, 7);
        assert_eq!(parsed.payload, b"hi");
        assert_eq!(parsed.seg_len(), 2);
    }
}
