//! Link-input queue: a single lock-protected FIFO fed by driver receive
//! paths and drained by the worker thread.
//!
//! Grounded on `original_source/src/net.h`'s single input FIFO and
//! `net.c`'s `net_input_handler`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// One received frame, tagged with its link protocol type and the device
/// it arrived on.
pub struct InputEntry {
    pub device_index: usize,
    pub protocol: u16,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct InputQueue {
    entries: Mutex<VecDeque<InputEntry>>,
    not_empty: Condvar,
    closed: Mutex<bool>,
}

impl InputQueue {
    pub fn new() -> Self {
        InputQueue {
            entries: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            closed: Mutex::new(false),
        }
    }

    /// Called from a driver thread on every received frame.
    pub fn push(&self, device_index: usize, protocol: u16, bytes: Vec<u8>) {
        let mut q = self.entries.lock().unwrap();
        q.push_back(InputEntry { device_index, protocol, bytes });
        self.not_empty.notify_one();
    }

    /// Blocks until an entry is available or the queue is closed, in which
    /// case it returns `None`.
    pub fn pop_blocking(&self) -> Option<InputEntry> {
        let mut q = self.entries.lock().unwrap();
        loop {
            if let Some(entry) = q.pop_front() {
                return Some(entry);
            }
            if *self.closed.lock().unwrap() {
                return None;
            }
            q = self.not_empty.wait(q).unwrap();
        }
    }

    /// Wakes the worker so it observes `closed` and exits its drain loop.
    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_preserves_order() {
        let q = InputQueue::new();
        q.push(0, 0x0800, vec![1]);
        q.push(0, 0x0800, vec![2]);
        assert_eq!(q.pop_blocking().unwrap().bytes, vec![1]);
        assert_eq!(q.pop_blocking().unwrap().bytes, vec![2]);
    }

    #[test]
    fn close_wakes_blocked_pop() {
        let q = Arc::new(InputQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop_blocking());
        thread::sleep(std::time::Duration::from_millis(20));
        q.close();
        assert!(handle.join().unwrap().is_none());
    }
}
