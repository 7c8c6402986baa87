//! Transfer-rate accounting.
//!
//! The read loop calls [`ThroughputMeter::record_bytes`] once per frame; a
//! separate timer stage calls [`ThroughputMeter::sample_and_reset`] on a fixed
//! cadence. The byte counter is a single atomic, so the hot path never takes a
//! lock, and the swap in `sample_and_reset` makes read-and-reset one step: a
//! byte recorded concurrently lands in exactly one window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Bytes observed during one reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputSample {
    /// Bytes recorded since the previous sample.
    pub bytes: u64,
    /// Length of the window in seconds.
    pub window_secs: f64,
}

impl ThroughputSample {
    pub fn new(bytes: u64, window: Duration) -> Self {
        Self {
            bytes,
            window_secs: window.as_secs_f64(),
        }
    }

    /// Average rate over the window; zero for an empty window.
    pub fn bytes_per_sec(&self) -> f64 {
        if self.window_secs > 0.0 {
            self.bytes as f64 / self.window_secs
        } else {
            0.0
        }
    }

    pub fn kib_per_sec(&self) -> f64 {
        self.bytes_per_sec() / 1024.0
    }
}

pub struct ThroughputMeter {
    window_bytes: AtomicU64,
    total_bytes: AtomicU64,
    /// Start of the current window. Touched only by the reporting side.
    window_start: Mutex<Instant>,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputMeter {
    pub fn new() -> Self {
        Self {
            window_bytes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            window_start: Mutex::new(Instant::now()),
        }
    }

    /// Add `n` bytes to the current window. O(1), lock-free.
    #[inline]
    pub fn record_bytes(&self, n: usize) {
        let n = n as u64;
        self.window_bytes.fetch_add(n, Ordering::Relaxed);
        self.total_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Close the current window and start a new one.
    pub fn sample_and_reset(&self) -> ThroughputSample {
        let mut start = self.window_start.lock();
        let now = Instant::now();
        let bytes = self.window_bytes.swap(0, Ordering::AcqRel);
        let window = now.saturating_duration_since(*start);
        *start = now;
        ThroughputSample::new(bytes, window)
    }

    /// Bytes recorded since construction or the last [`reset`](Self::reset).
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Bytes recorded in the window that is still open.
    pub fn pending_bytes(&self) -> u64 {
        self.window_bytes.load(Ordering::Relaxed)
    }

    /// Zero all counters and restart the window clock.
    pub fn reset(&self) {
        let mut start = self.window_start.lock();
        self.window_bytes.store(0, Ordering::Relaxed);
        self.total_bytes.store(0, Ordering::Relaxed);
        *start = Instant::now();
    }
}
