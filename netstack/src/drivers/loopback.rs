//! In-memory loopback device: always up, immediately re-delivers every
//! transmitted frame to the link-input queue. Used by integration tests
//! (ICMP echo, UDP loopback) that need a real device without a host
//! TUN/TAP or root privilege.

use std::sync::Arc;

use crate::device::DeviceOps;
use crate::error::NetResult;
use crate::queue::InputQueue;

pub struct LoopbackDevice {
    device_index: usize,
    queue: Arc<InputQueue>,
}

impl LoopbackDevice {
    /// `device_index` must match the index this device is registered
    /// under, so looped-back frames are attributed correctly.
    pub fn new(device_index: usize, queue: Arc<InputQueue>) -> Self {
        LoopbackDevice { device_index, queue }
    }
}

impl DeviceOps for LoopbackDevice {
    fn transmit(&mut self, ethertype: u16, payload: &[u8], _dst: crate::addr::MacAddr) -> NetResult<()> {
        self.queue.push(self.device_index, ethertype, payload.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmit_enqueues_for_self() {
        let queue = Arc::new(InputQueue::new());
        let mut dev = LoopbackDevice::new(0, queue.clone());
        dev.transmit(0x0800, &[1, 2, 3], crate::addr::MacAddr::ZERO).unwrap();
        let entry = queue.pop_blocking().unwrap();
        assert_eq!(entry.device_index, 0);
        assert_eq!(entry.protocol, 0x0800);
        assert_eq!(entry.bytes, vec![1, 2, 3]);
    }
}
