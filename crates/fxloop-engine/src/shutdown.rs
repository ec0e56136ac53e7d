use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Inner {
    stop: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Cancellation token shared by the engine, its stages and the front end.
/// Cloning is cheap; all clones observe the same trigger.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                stop: AtomicBool::new(false),
                lock: Mutex::new(()),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn trigger(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        let _g = self.inner.lock.lock();
        self.inner.wake.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    /// Sleep for `dur` unless triggered first. Returns true if the full
    /// interval elapsed without a trigger.
    pub fn sleep(&self, dur: Duration) -> bool {
        if dur.is_zero() {
            return !self.is_triggered();
        }
        let deadline = Instant::now() + dur;
        let mut g = self.inner.lock.lock();
        while !self.is_triggered() {
            if self.inner.wake.wait_until(&mut g, deadline).timed_out() {
                break;
            }
        }
        !self.is_triggered()
    }
}
