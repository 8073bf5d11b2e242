//! Event bus: a single broadcast signal used to interrupt blocked user
//! commands on shutdown.
//!
//! Grounded on `original_source/src/net.h`'s
//! `net_event_subscribe`/`net_raise_event`.

use std::sync::Mutex;

pub type Subscriber = Box<dyn Fn() + Send>;

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus { subscribers: Mutex::new(Vec::new()) }
    }

    /// Registers a handler invoked on every `raise_event` call. TCP
    /// subscribes once per module to interrupt every PCB's wait context.
    pub fn subscribe(&self, handler: Subscriber) {
        self.subscribers.lock().unwrap().push(handler);
    }

    /// Wakes all subscribers. Used on shutdown; safe to call more than
    /// once.
    pub fn raise_event(&self) {
        log::info!("event bus: raising shutdown event");
        for handler in self.subscribers.lock().unwrap().iter() {
            handler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn raise_event_invokes_all_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = count.clone();
            bus.subscribe(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        bus.raise_event();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
