//! Timer wheel: a list of `(interval, callback)` registrations fired at or
//! after their due time by a dedicated timer thread.
//!
//! Grounded on `original_source/src/net.h`'s `net_timer_register`. Used by
//! ARP aging and TCP retransmission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(100);

type Callback = Box<dyn Fn() + Send>;

struct Registration {
    interval: Duration,
    next_due: Instant,
    callback: Callback,
}

/// Collects timer registrations and drives them from a single thread.
/// Callbacks run on that thread and must take their own locks — the timer
/// wheel itself holds no protocol state.
#[derive(Default)]
pub struct TimerWheel {
    registrations: Mutex<Vec<Registration>>,
    stop: AtomicBool,
}

impl TimerWheel {
    pub fn new() -> Self {
        TimerWheel { registrations: Mutex::new(Vec::new()), stop: AtomicBool::new(false) }
    }

    pub fn register(&self, interval: Duration, callback: Callback) {
        let mut regs = self.registrations.lock().unwrap();
        regs.push(Registration { interval, next_due: Instant::now() + interval, callback });
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Runs on the timer thread until `request_stop` is called.
    pub fn run(&self) {
        while !self.stop.load(Ordering::SeqCst) {
            std::thread::sleep(TICK);
            let now = Instant::now();
            let mut regs = self.registrations.lock().unwrap();
            for reg in regs.iter_mut() {
                if now >= reg.next_due {
                    (reg.callback)();
                    reg.next_due += reg.interval;
                }
            }
        }
        log::info!("timer thread exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn fires_after_interval() {
        let wheel = Arc::new(TimerWheel::new());
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        wheel.register(Duration::from_millis(10), Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let w = wheel.clone();
        let handle = std::thread::spawn(move || w.run());
        std::thread::sleep(Duration::from_millis(250));
        wheel.request_stop();
        handle.join().unwrap();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
