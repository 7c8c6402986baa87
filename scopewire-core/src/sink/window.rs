//! Sink feeding a shared rolling [`SampleWindow`] for a live display.
//!
//! The renderer holds a clone of the handle and calls `snapshot()` at its own
//! frame rate; the pipeline only ever holds the lock long enough to copy one
//! block in.

use std::sync::Arc;

use parking_lot::Mutex;

use super::SampleSink;
use crate::{
    buffering::{SampleBlock, SampleWindow},
    error::Result,
};

#[derive(Clone)]
pub struct WindowSink {
    window: Arc<Mutex<SampleWindow>>,
}

impl WindowSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: Arc::new(Mutex::new(SampleWindow::new(capacity))),
        }
    }

    /// Most recent samples, oldest first.
    pub fn snapshot(&self) -> Vec<u16> {
        self.window.lock().snapshot()
    }

    pub fn total_samples(&self) -> u64 {
        self.window.lock().total_pushed()
    }
}

impl SampleSink for WindowSink {
    fn on_sample_block(&mut self, block: SampleBlock) -> Result<()> {
        self.window.lock().extend(&block.samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PackingMode;

    #[test]
    fn clones_share_the_window() {
        let mut sink = WindowSink::new(4);
        let display = sink.clone();
        for seq in 0..3u64 {
            let samples = vec![seq as u16 * 10, seq as u16 * 10 + 1];
            sink.on_sample_block(SampleBlock::new(seq, PackingMode::Packed12, samples))
                .unwrap();
        }
        assert_eq!(display.snapshot(), vec![10, 11, 20, 21]);
        assert_eq!(display.total_samples(), 6);
    }
}
