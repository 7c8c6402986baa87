//! Rolling window of the most recent samples, for live display consumers.
//!
//! A renderer typically redraws at its own pace and only wants "the last N
//! samples". The window is a fixed-size `ringbuf::HeapRb` that overwrites the
//! oldest samples, so memory stays constant however fast blocks arrive.

use ringbuf::{
    traits::{Consumer, Observer, RingBuffer},
    HeapRb,
};

pub struct SampleWindow {
    rb: HeapRb<u16>,
    capacity: usize,
    total_pushed: u64,
}

impl SampleWindow {
    /// Window holding at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rb: HeapRb::new(capacity),
            capacity,
            total_pushed: 0,
        }
    }

    /// Append samples, evicting the oldest ones once full.
    pub fn extend(&mut self, samples: &[u16]) {
        self.rb.push_iter_overwrite(samples.iter().copied());
        self.total_pushed += samples.len() as u64;
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<u16> {
        self.rb.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.rb.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.rb.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples ever pushed, including evicted ones.
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    pub fn clear(&mut self) {
        self.rb.clear();
    }
}
