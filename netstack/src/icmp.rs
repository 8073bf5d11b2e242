//! ICMPv4 (RFC 792): stateless echo-reply handling.
//!
//! Grounded on `kernel/src/net/ipv4.rs`'s `process_icmp`.

use crate::addr::Ipv4Addr;
use crate::arp::ArpTable;
use crate::checksum::cksum16;
use crate::device::DeviceRegistry;
use crate::ip::{Ip, PROTO_ICMP};

const TYPE_ECHO_REQUEST: u8 = 8;
const TYPE_ECHO_REPLY: u8 = 0;

/// Handles an inbound ICMP message addressed to us. Only ECHO REQUEST is
/// acted on; anything else (or a bad checksum) is dropped with a log line.
pub fn input(ip: &Ip, devices: &DeviceRegistry, arp: &ArpTable, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) {
    if payload.len() < 8 {
        log::debug!("icmp: dropping undersized message");
        return;
    }
    if cksum16(payload, 0) != 0 {
        log::debug!("icmp: dropping message with bad checksum");
        return;
    }
    if payload[0] != TYPE_ECHO_REQUEST {
        log::debug!("icmp: ignoring non-echo-request type {}", payload[0]);
        return;
    }

    let mut reply = payload.to_vec();
    reply[0] = TYPE_ECHO_REPLY;
    reply[2] = 0;
    reply[3] = 0;
    let c = cksum16(&reply, 0);
    reply[2..4].copy_from_slice(&c.to_be_bytes());

    if let Err(e) = ip.output(devices, arp, PROTO_ICMP, &reply, dst, src) {
        log::warn!("icmp: failed to emit echo reply: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_reply_preserves_identifier_sequence_and_payload() {
        let mut req = vec![TYPE_ECHO_REQUEST, 0, 0, 0, 0, 1, 0, 1];
        req.extend_from_slice(b"abcd");
        let c = cksum16(&req, 0);
        req[2..4].copy_from_slice(&c.to_be_bytes());
        assert_eq!(cksum16(&req, 0), 0);

        let mut reply = req.clone();
        reply[0] = TYPE_ECHO_REPLY;
        reply[2] = 0;
        reply[3] = 0;
        let c = cksum16(&reply, 0);
        reply[2..4].copy_from_slice(&c.to_be_bytes());

        assert_eq!(cksum16(&reply, 0), 0);
        assert_eq!(&reply[4..8], &req[4..8]);
        assert_eq!(&reply[8..], b"abcd");
    }
}
