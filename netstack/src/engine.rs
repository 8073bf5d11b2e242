//! The engine: a single owning context tying every component together.
//!
//! `spec.md` §9 calls for consolidating what the original implementation
//! kept as process globals (`ifaces`, `protocols`, `routes`, `pcbs[]`,
//! the module mutex) behind one context threaded explicitly to every
//! component. `Engine` is that context; `net_init`/`net_run`/
//! `net_shutdown` map onto `Engine::new`/`run`/`shutdown`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::addr::{Endpoint, Ipv4Addr, MacAddr};
use crate::arp::{self, ArpTable};
use crate::device::{DeviceFlags, DeviceOps, DeviceRegistry, Ipv4Interface, LinkType};
use crate::dispatch::Dispatcher;
use crate::error::NetResult;
use crate::event::EventBus;
use crate::icmp;
use crate::ip::{self, Ip};
use crate::queue::InputQueue;
use crate::tcp::TcpTable;
use crate::timer::TimerWheel;
use crate::udp::UdpTable;

const ARP_AGE_INTERVAL: Duration = Duration::from_secs(5);
const TCP_RETRANSMIT_INTERVAL: Duration = Duration::from_millis(100);

/// The process-wide networking engine. Construct with `new`, register
/// devices/interfaces/routes, then call `run` — registration methods
/// after `run` has started are a logic error the caller must avoid (the
/// original's comment: "must not be called after net_run()").
pub struct Engine {
    pub devices: DeviceRegistry,
    queue: Arc<InputQueue>,
    dispatcher: Arc<Dispatcher>,
    timer: Arc<TimerWheel>,
    events: Arc<EventBus>,
    arp: Arc<ArpTable>,
    pub ip: Arc<Ip>,
    udp: Arc<UdpTable>,
    tcp: Arc<TcpTable>,
    running: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            devices: DeviceRegistry::new(),
            queue: Arc::new(InputQueue::new()),
            dispatcher: Arc::new(Dispatcher::new()),
            timer: Arc::new(TimerWheel::new()),
            events: Arc::new(EventBus::new()),
            arp: Arc::new(ArpTable::new()),
            ip: Arc::new(Ip::new()),
            udp: Arc::new(UdpTable::new()),
            tcp: Arc::new(TcpTable::new()),
            running: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Registers a device and opens it. Must be called before `run`.
    pub fn register_device(
        &mut self,
        name: impl Into<String>,
        link_type: LinkType,
        mtu: u16,
        flags: DeviceFlags,
        addr: MacAddr,
        broadcast: MacAddr,
        ops: Box<dyn DeviceOps>,
    ) -> NetResult<usize> {
        self.devices.register(name, link_type, mtu, flags, addr, broadcast, ops)
    }

    /// `ip_iface_register`: attaches an IPv4 interface to a device and
    /// adds the implied on-link route.
    pub fn register_interface(&self, device_index: usize, unicast: Ipv4Addr, netmask: Ipv4Addr) -> NetResult<()> {
        let iface = Ipv4Interface::new(unicast, netmask, device_index);
        self.devices.add_iface(device_index, iface)?;
        self.ip.add_onlink_route(&iface);
        Ok(())
    }

    /// `ip_route_set_default_gateway`.
    pub fn set_default_gateway(&self, device_index: usize, gateway: Ipv4Addr) {
        self.ip.set_default_gateway(device_index, gateway);
    }

    /// Returns the handle used for all ingress/egress this device's
    /// driver should call `queue.push` on. `drivers::LoopbackDevice`
    /// and `drivers::TapDevice` both need this at construction time,
    /// before they have been handed to `register_device`.
    pub fn input_queue(&self) -> Arc<InputQueue> {
        self.queue.clone()
    }

    /// `net_run`: registers the link-layer protocol handlers, starts the
    /// worker/timer threads, and opens every device's input path. Call
    /// once, after all setup is complete.
    pub fn run(self: &Arc<Self>) -> NetResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.dispatcher.register(ip::ETHERTYPE_IPV4, {
            let engine = self.clone();
            Box::new(move |device_index, bytes| {
                engine.ip.input(device_index, bytes, &engine.devices);
            })
        })?;
        self.dispatcher.register(arp::ETHERTYPE_ARP, {
            let engine = self.clone();
            Box::new(move |device_index, bytes| {
                engine.ip.handle_arp_frame(device_index, bytes, &engine.devices, &engine.arp);
            })
        })?;

        self.ip.register_protocol(ip::PROTO_ICMP, {
            let engine = self.clone();
            Box::new(move |_device_index, src, dst, payload| {
                icmp::input(&engine.ip, &engine.devices, &engine.arp, src, dst, payload);
            })
        })?;
        self.ip.register_protocol(ip::PROTO_UDP, {
            let engine = self.clone();
            Box::new(move |_device_index, src, dst, payload| {
                engine.udp.input(src, dst, payload);
            })
        })?;
        self.ip.register_protocol(ip::PROTO_TCP, {
            let engine = self.clone();
            Box::new(move |device_index, src, dst, payload| {
                engine.tcp.input(device_index, src, dst, payload, &engine.ip, &engine.devices, &engine.arp);
            })
        })?;

        self.events.subscribe({
            let tcp = self.tcp.clone();
            Box::new(move || tcp.interrupt_all())
        });

        self.timer.register(ARP_AGE_INTERVAL, {
            let arp = self.arp.clone();
            Box::new(move || arp.age())
        });
        self.timer.register(TCP_RETRANSMIT_INTERVAL, {
            let engine = self.clone();
            Box::new(move || engine.tcp.retransmit_tick(&engine.ip, &engine.devices, &engine.arp))
        });

        let mut threads = self.threads.lock().unwrap();

        let worker = {
            let engine = self.clone();
            std::thread::Builder::new()
                .name("netstack-worker".into())
                .spawn(move || engine.dispatcher.run(&engine.queue, &engine.devices))
                .expect("failed to spawn worker thread")
        };
        threads.push(worker);

        let timer_thread = {
            let timer = self.timer.clone();
            std::thread::Builder::new()
                .name("netstack-timer".into())
                .spawn(move || timer.run())
                .expect("failed to spawn timer thread")
        };
        threads.push(timer_thread);

        log::info!("engine running: {} device(s) registered", self.devices.len());
        Ok(())
    }

    /// `net_shutdown`: raises the event bus (interrupting every blocked
    /// call), stops the worker and timer, and joins their threads so the
    /// call returns only once the engine is fully quiesced.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.events.raise_event();
        self.queue.close();
        self.timer.request_stop();
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
        log::info!("engine shut down");
    }

    // --- UDP API ---

    pub fn udp_open(&self) -> NetResult<usize> {
        self.udp.open()
    }

    pub fn udp_bind(&self, id: usize, local: Endpoint) -> NetResult<()> {
        self.udp.bind(id, local)
    }

    pub fn udp_sendto(&self, id: usize, payload: &[u8], foreign: Endpoint) -> NetResult<()> {
        self.udp.sendto(id, payload, foreign, &self.ip, &self.devices, &self.arp)
    }

    pub fn udp_recvfrom(&self, id: usize, buf: &mut [u8]) -> NetResult<(usize, Endpoint)> {
        self.udp.recvfrom(id, buf)
    }

    pub fn udp_close(&self, id: usize) -> NetResult<()> {
        self.udp.close(id)
    }

    // --- TCP API ---

    pub fn tcp_open_rfc793(&self, local: Endpoint, foreign: Option<Endpoint>, active: bool) -> NetResult<usize> {
        self.tcp.open(local, foreign, active, &self.ip, &self.devices, &self.arp)
    }

    pub fn tcp_send(&self, id: usize, data: &[u8]) -> NetResult<usize> {
        self.tcp.send(id, data, &self.ip, &self.devices, &self.arp)
    }

    pub fn tcp_receive(&self, id: usize, buf: &mut [u8]) -> NetResult<usize> {
        self.tcp.receive(id, buf)
    }

    pub fn tcp_close(&self, id: usize) -> NetResult<()> {
        self.tcp.close(id, &self.ip, &self.devices, &self.arp)
    }

    // --- IP API ---

    pub fn ip_output(&self, protocol: u8, payload: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> NetResult<()> {
        self.ip.output(&self.devices, &self.arp, protocol, payload, src, dst).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::LoopbackDevice;

    fn build_loopback_engine() -> Arc<Engine> {
        let mut engine = Engine::new();
        let queue = engine.input_queue();
        let dev = LoopbackDevice::new(0, queue);
        let idx = engine
            .register_device(
                "lo",
                LinkType::Loopback,
                1500,
                DeviceFlags::UP | DeviceFlags::LOOPBACK,
                MacAddr::ZERO,
                MacAddr::ZERO,
                Box::new(dev),
            )
            .unwrap();
        engine.register_interface(idx, Ipv4Addr::LOCALHOST, Ipv4Addr::new(255, 0, 0, 0)).unwrap();
        let engine = Arc::new(engine);
        engine.run().unwrap();
        engine
    }

    #[test]
    fn udp_loopback_round_trip() {
        let engine = build_loopback_engine();
        let a = engine.udp_open().unwrap();
        engine.udp_bind(a, Endpoint::new(Ipv4Addr::LOCALHOST, 9000)).unwrap();
        let b = engine.udp_open().unwrap();
        engine.udp_bind(b, Endpoint::new(Ipv4Addr::LOCALHOST, 9001)).unwrap();

        engine.udp_sendto(a, b"hello", Endpoint::new(Ipv4Addr::LOCALHOST, 9001)).unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = engine.udp_recvfrom(b, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from.port, 9000);

        engine.shutdown();
    }
}
