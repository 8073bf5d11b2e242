//! Per-PCB wait/wake primitive, mirroring the C `sched_sleep(ctx,
//! mutex)` / `sched_wakeup(ctx)` / `sched_interrupt(ctx)` /
//! `sched_destroy(ctx)` contract from `original_source/src/sched.h`: a
//! condition variable keyed to the PCB, always paired with the mutex that
//! guards its table.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, MutexGuard};

use crate::error::NetError;

/// A wait context embedded in a TCP or UDP PCB. `sleep` must be called
/// with the guard for the same mutex that protects the PCB table; it is
/// released while blocked and reacquired before returning, exactly like
/// `Condvar::wait`.
#[derive(Default)]
pub struct WaitContext {
    condvar: Condvar,
    interrupted: AtomicBool,
    waiters: AtomicUsize,
}

impl WaitContext {
    pub fn new() -> Self {
        WaitContext { condvar: Condvar::new(), interrupted: AtomicBool::new(false), waiters: AtomicUsize::new(0) }
    }

    /// Blocks the caller, releasing `guard`'s mutex, until `wakeup` or
    /// `interrupt` is called. Returns `Err(Interrupted)` if the context was
    /// interrupted either before or during the wait.
    pub fn sleep<'a, T>(&self, guard: MutexGuard<'a, T>) -> Result<MutexGuard<'a, T>, NetError> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(NetError::Interrupted);
        }
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let guard = self.condvar.wait(guard).unwrap();
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        if self.interrupted.load(Ordering::SeqCst) {
            Err(NetError::Interrupted)
        } else {
            Ok(guard)
        }
    }

    /// Wakes every waiter without marking the context interrupted.
    pub fn wakeup(&self) {
        self.condvar.notify_all();
    }

    /// Marks the context interrupted and wakes every waiter; subsequent
    /// `sleep` calls fail immediately until `reset`.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    /// Clears the interrupted flag, e.g. when a PCB slot is reused.
    pub fn reset(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    pub fn has_waiters(&self) -> bool {
        self.waiters.load(Ordering::SeqCst) > 0
    }

    /// Fails if any waiter remains; caller should `wakeup` and defer
    /// release to the last waiter instead.
    pub fn destroy(&self) -> Result<(), NetError> {
        if self.has_waiters() {
            Err(NetError::InvalidState)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wakeup_releases_sleeper() {
        let mutex = Arc::new(Mutex::new(0));
        let ctx = Arc::new(WaitContext::new());
        let m = mutex.clone();
        let c = ctx.clone();
        let handle = thread::spawn(move || {
            let guard = m.lock().unwrap();
            c.sleep(guard).unwrap();
        });
        thread::sleep(Duration::from_millis(20));
        ctx.wakeup();
        handle.join().unwrap();
    }

    #[test]
    fn interrupt_fails_sleeper() {
        let mutex = Arc::new(Mutex::new(0));
        let ctx = Arc::new(WaitContext::new());
        let m = mutex.clone();
        let c = ctx.clone();
        let handle = thread::spawn(move || {
            let guard = m.lock().unwrap();
            c.sleep(guard).map(|_| ()).unwrap_err()
        });
        thread::sleep(Duration::from_millis(20));
        ctx.interrupt();
        assert_eq!(handle.join().unwrap(), NetError::Interrupted);
    }
}
