//! Device registry: link devices, their ops vtable, and the IPv4 interfaces
//! attached to them.
//!
//! Grounded on `kernel/src/drivers/net/mod.rs`'s `NetworkDevice` trait and
//! `NetworkManager`, and on `original_source/src/net.h`'s `net_device` /
//! `net_device_ops` / `net_iface`.

use std::fmt;
use std::sync::Mutex;

use bitflags::bitflags;

use crate::addr::{Ipv4Addr, MacAddr};
use crate::error::{NetError, NetResult};

bitflags! {
    /// Mirrors `NET_DEVICE_FLAG_*` in `original_source/src/net.h`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceFlags: u16 {
        const UP        = 0x0001;
        const LOOPBACK  = 0x0010;
        const BROADCAST = 0x0020;
        const P2P       = 0x0040;
        const NEED_ARP  = 0x0100;
    }
}

/// Link type, mirroring `NET_DEVICE_TYPE_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Dummy,
    Loopback,
    Ethernet,
}

/// The small transmit/receive contract a concrete link driver implements.
/// Everything past this is out of scope (see `spec.md` §1) — the driver
/// itself (TAP, loopback) owns its own read thread and private state.
pub trait DeviceOps: Send {
    fn open(&mut self) -> NetResult<()> {
        Ok(())
    }
    fn close(&mut self) -> NetResult<()> {
        Ok(())
    }
    /// Transmit `payload` with the given link-layer `ethertype`, addressed
    /// to `dst`. Returns `Err` on failure; MUST emit the frame with the
    /// given protocol type on success.
    fn transmit(&mut self, ethertype: u16, payload: &[u8], dst: MacAddr) -> NetResult<()>;
}

/// A single IPv4 binding on a device. `broadcast = (unicast & netmask) |
/// !netmask`, using the correct bitwise complement — `original_source`'s C
/// used the logical-NOT `!` by mistake (see `spec.md` §9); that bug is not
/// reproduced here.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Interface {
    pub unicast: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub device_index: usize,
}

impl Ipv4Interface {
    pub fn new(unicast: Ipv4Addr, netmask: Ipv4Addr, device_index: usize) -> Self {
        let broadcast = Ipv4Addr::from_bits(unicast.to_bits() & netmask.to_bits() | !netmask.to_bits());
        Ipv4Interface { unicast, netmask, broadcast, device_index }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.unicast.mask(self.netmask)
    }
}

/// A link device: index, name, type, MTU, flags, link address, ops vtable,
/// and the IPv4 interfaces attached to it.
pub struct Device {
    pub index: usize,
    pub name: String,
    pub link_type: LinkType,
    pub mtu: u16,
    pub flags: DeviceFlags,
    pub addr: MacAddr,
    pub broadcast: MacAddr,
    pub ifaces: Vec<Ipv4Interface>,
    ops: Box<dyn DeviceOps>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("mtu", &self.mtu)
            .field("flags", &self.flags)
            .finish()
    }
}

impl Device {
    pub fn is_up(&self) -> bool {
        self.flags.contains(DeviceFlags::UP)
    }

    /// Transmit `payload` out this device, rejecting it if the device is
    /// down or the payload would exceed the MTU.
    pub fn output(&mut self, ethertype: u16, payload: &[u8], dst: MacAddr) -> NetResult<()> {
        if !self.is_up() {
            return Err(NetError::DeviceDown);
        }
        if payload.len() > self.mtu as usize {
            return Err(NetError::Mtu);
        }
        self.ops.transmit(ethertype, payload, dst)
    }
}

/// Append-only table of registered devices. Per `spec.md` §5, the registry
/// itself is written only during setup (before `Engine::run`); each device
/// is individually mutex-guarded because `transmit` is a runtime hot path.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Vec<Mutex<Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry { devices: Vec::new() }
    }

    /// Register a device, assigning it the next monotonically increasing
    /// index, and open it via its `open` op.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        link_type: LinkType,
        mtu: u16,
        flags: DeviceFlags,
        addr: MacAddr,
        broadcast: MacAddr,
        mut ops: Box<dyn DeviceOps>,
    ) -> NetResult<usize> {
        let index = self.devices.len();
        ops.open()?;
        let dev = Device {
            index,
            name: name.into(),
            link_type,
            mtu,
            flags,
            addr,
            broadcast,
            ifaces: Vec::new(),
            ops,
        };
        log::info!(
            "device registered: index={} name={} mtu={} flags={:?}",
            dev.index, dev.name, dev.mtu, dev.flags
        );
        self.devices.push(Mutex::new(dev));
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&Mutex<Device>> {
        self.devices.get(index)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutex<Device>> {
        self.devices.iter()
    }

    /// Attach an IPv4 interface to a registered device.
    pub fn add_iface(&self, device_index: usize, iface: Ipv4Interface) -> NetResult<()> {
        let dev = self.get(device_index).ok_or(NetError::DeviceDown)?;
        let mut dev = dev.lock().unwrap();
        log::info!(
            "interface registered: dev={} unicast={} netmask={} broadcast={}",
            dev.name, iface.unicast, iface.netmask, iface.broadcast
        );
        dev.ifaces.push(iface);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_uses_bitwise_complement() {
        let unicast = Ipv4Addr::new(192, 0, 2, 10);
        let netmask = Ipv4Addr::new(255, 255, 255, 0);
        let iface = Ipv4Interface::new(unicast, netmask, 0);
        assert_eq!(iface.broadcast, Ipv4Addr::new(192, 0, 2, 255));
    }
}
