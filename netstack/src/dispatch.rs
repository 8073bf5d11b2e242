//! Protocol dispatcher and worker thread.
//!
//! Maps a 16-bit link protocol type (e.g. `0x0800` IPv4, `0x0806` ARP) to a
//! registered input handler, and runs the single-threaded drain loop over
//! the link-input queue. Grounded on `net.c`'s
//! `net_protocol_register`/`net_softirq_handler`.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::device::DeviceRegistry;
use crate::error::{NetError, NetResult};
use crate::queue::InputQueue;

pub type Handler = Box<dyn Fn(usize, &[u8]) + Send + Sync>;

/// Protocol type → handler table. Written only during setup, per
/// `spec.md` §5; reads during the worker's steady-state drain loop take no
/// lock contention in practice but still go through an `RwLock` since
/// registration and dispatch could in principle interleave.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<u16, Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher { handlers: RwLock::new(HashMap::new()) }
    }

    /// Register a handler for `protocol`. Duplicate registrations are
    /// rejected.
    pub fn register(&self, protocol: u16, handler: Handler) -> NetResult<()> {
        let mut handlers = self.handlers.write().unwrap();
        if handlers.contains_key(&protocol) {
            return Err(NetError::PortInUse);
        }
        handlers.insert(protocol, handler);
        Ok(())
    }

    /// Runs on the worker thread: drain the input queue until it is closed,
    /// dispatching each entry to its registered handler. Unknown protocols
    /// are dropped silently (with a log line).
    pub fn run(&self, queue: &InputQueue, _devices: &DeviceRegistry) {
        while let Some(entry) = queue.pop_blocking() {
            let handlers = self.handlers.read().unwrap();
            match handlers.get(&entry.protocol) {
                Some(handler) => handler(entry.device_index, &entry.bytes),
                None => log::debug!(
                    "dropping frame with unregistered protocol 0x{:04x} from device {}",
                    entry.protocol, entry.device_index
                ),
            }
        }
        log::info!("worker thread exiting: input queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn duplicate_registration_rejected() {
        let d = Dispatcher::new();
        d.register(0x0800, Box::new(|_, _| {})).unwrap();
        assert_eq!(d.register(0x0800, Box::new(|_, _| {})), Err(NetError::PortInUse));
    }

    #[test]
    fn dispatch_invokes_registered_handler() {
        let d = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        d.register(0x0800, Box::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        let q = InputQueue::new();
        q.push(0, 0x0800, vec![1, 2, 3]);
        q.push(0, 0x9999, vec![4]);
        q.close();
        let devices = DeviceRegistry::new();
        d.run(&q, &devices);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
