//! TCP echo server: accepts one passive connection on the given port and
//! echoes back whatever it receives, hex-dumping each segment to stderr.
//!
//! Mirrors `original_source/src/test/step25.c`: loopback plus an optional
//! tap interface with a default route, `tcp_open_rfc793` in passive mode,
//! then an alternating `tcp_receive`/`tcp_send` loop.

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

    let local = Endpoint::new(Ipv4Addr::ANY, args.port);
    let id = engine.tcp_open_rfc793(local, None, false).expect("tcp_open_rfc793");
    log::info!("listening on {}", local);

    let mut buf = [0u8; 2048];
    loop {
        match engine.tcp_receive(id, &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                log::debug!("received {} bytes: {:02x?}", n, &buf[..n]);
                if engine.tcp_send(id, &buf[..n]).is_err() {
                    break;
                }
            }
        }
    }

    let _ = engine.tcp_close(id);
    engine.shutdown();
}
