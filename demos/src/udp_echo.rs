//! UDP echo server: binds the given port and echoes every datagram back
//! to its sender. Setup mirrors `original_source/src/test/step19.c`
//! (`udp_open`/`udp_bind` against a loopback interface); the echo loop
//! itself answers the same "echo service" step25.c implements for TCP.

use std::sync::Arc;

use clap::Parser;
use netstack::device::{DeviceFlags, LinkType};
use netstack::drivers::LoopbackDevice;
use netstack::{Endpoint, Engine, Ipv4Addr, MacAddr};

#[derive(Parser)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 7)]
    port: u16,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut engine = Engine::new();
    let queue = engine.input_queue();
    let lo = LoopbackDevice::new(0, queue);
    let idx = engine
        .register_device(
            "lo",
            LinkType::Loopback,
            1500,
            DeviceFlags::UP | DeviceFlags::LOOPBACK,
            MacAddr::ZERO,
            MacAddr::ZERO,
            Box::new(lo),
        )
        .expect("register loopback device");
    engine
        .register_interface(idx, Ipv4Addr::LOCALHOST, Ipv4Addr::new(255, 0, 0, 0))
        .expect("register loopback interface");

    let engine = Arc::new(engine);
    engine.run().expect("start engine");

    let id = engine.udp_open().expect("udp_open");
    engine.udp_bind(id, Endpoint::new(Ipv4Addr::ANY, args.port)).expect("udp_bind");
    log::info!("waiting for data on port {}", args.port);

    let mut buf = [0u8; 2048];
    loop {
        match engine.udp_recvfrom(id, &mut buf) {
            Ok((n, from)) => {
                log::debug!("received {} bytes from {}", n, from);
                let _ = engine.udp_sendto(id, &buf[..n], from);
            }
            Err(_) => break,
        }
    }

    let _ = engine.udp_close(id);
    engine.shutdown();
}
