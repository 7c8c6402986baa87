//! Cooperative stop flag shared by all stages of one pipeline run.
//!
//! Stages poll [`StopSignal::is_triggered`] between blocking operations; the
//! reporter sleeps in [`StopSignal::wait_timeout`] so a stop wakes it at once.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Inner {
    triggered: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent; returns `true` only for the first call.
    pub fn trigger(&self) -> bool {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _guard = self.inner.lock.lock();
        self.inner.cvar.notify_all();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Sleep until triggered or `timeout` elapses. Returns `true` if triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_triggered() {
            if self.inner.cvar.wait_until(&mut guard, deadline).timed_out() {
                return self.is_triggered();
            }
        }
        true
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn trigger_is_idempotent() {
        let stop = StopSignal::new();
        assert!(!stop.is_triggered());
        assert!(stop.trigger());
        assert!(!stop.trigger());
        assert!(stop.clone().is_triggered());
    }

    #[test]
    fn wait_times_out_without_trigger() {
        let stop = StopSignal::new();
        let start = Instant::now();
        assert!(!stop.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn trigger_wakes_waiter_early() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });
        let start = Instant::now();
        assert!(stop.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(2));
        t.join().expect("trigger thread panicked");
    }
}
