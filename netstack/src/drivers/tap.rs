//! Linux TUN/TAP driver (feature `tap`). Opens `/dev/net/tun`, attaches it
//! to a named tap interface via `TUNSETIFF`, and spawns a reader thread
//! that pushes every frame read from the file descriptor onto the
//! engine's link-input queue. Grounded in `tapip-rs`'s use of `libc` for
//! raw TUN/TAP ioctls in a user-space TCP/IP stack.
//!
//! This is deliberately thin: per `spec.md` §1, the concrete link driver
//! is an external collaborator, contract-only past `open`/`close`/
//! `transmit`.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::addr::MacAddr;
use crate::device::DeviceOps;
use crate::error::{NetError, NetResult};
use crate::queue::InputQueue;

const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFNAMSIZ: usize = 16;

#[repr(C)]
struct IfReq {
    name: [libc::c_char; IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

pub struct TapDevice {
    fd: RawFd,
    device_index: usize,
    queue: Arc<InputQueue>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl TapDevice {
    /// Opens `/dev/net/tun` and attaches it to `name` as a TAP interface.
    /// Does not start reading until `open()` (the `DeviceOps` method) is
    /// called, matching `spec.md`'s device-registration sequencing.
    pub fn create(name: &str, device_index: usize, queue: Arc<InputQueue>) -> NetResult<Self> {
        let path = CString::new("/dev/net/tun").unwrap();
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(NetError::DeviceDown);
        }

        let mut req: IfReq = unsafe { std::mem::zeroed() };
        let name_bytes = name.as_bytes();
        if name_bytes.len() >= IFNAMSIZ {
            return Err(NetError::Malformed);
        }
        for (i, b) in name_bytes.iter().enumerate() {
            req.name[i] = *b as libc::c_char;
        }
        req.flags = IFF_TAP | IFF_NO_PI;

        let rc = unsafe { libc::ioctl(fd, TUNSETIFF, &req) };
        if rc < 0 {
            unsafe { libc::close(fd) };
            return Err(NetError::DeviceDown);
        }

        Ok(TapDevice { fd, device_index, queue, stop: Arc::new(AtomicBool::new(false)), reader: None })
    }
}

impl DeviceOps for TapDevice {
    fn open(&mut self) -> NetResult<()> {
        let fd = self.fd;
        let device_index = self.device_index;
        let queue = self.queue.clone();
        let stop = self.stop.clone();
        let handle = std::thread::Builder::new()
            .name(format!("netstack-tap-{}", device_index))
            .spawn(move || {
                let mut buf = vec![0u8; 65536];
                while !stop.load(Ordering::SeqCst) {
                    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
                    if n > 0 {
                        queue.push(device_index, crate::ip::ETHERTYPE_IPV4, buf[..n as usize].to_vec());
                    }
                }
            })
            .expect("failed to spawn tap reader thread");
        self.reader = Some(handle);
        Ok(())
    }

    fn close(&mut self) -> NetResult<()> {
        self.stop.store(true, Ordering::SeqCst);
        unsafe { libc::close(self.fd) };
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn transmit(&mut self, _ethertype: u16, payload: &[u8], _dst: MacAddr) -> NetResult<()> {
        let n = unsafe { libc::write(self.fd, payload.as_ptr() as *const libc::c_void, payload.len()) };
        if n as usize != payload.len() {
            return Err(NetError::DeviceDown);
        }
        Ok(())
    }
}

impl Drop for TapDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
