//! Per-block summary statistics, readable from any thread.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::SampleSink;
use crate::{buffering::SampleBlock, error::Result};

/// Summary of the most recent block plus running totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStats {
    pub blocks: u64,
    pub samples: u64,
    pub last_seq: Option<u64>,
    pub last_min: Option<u16>,
    pub last_max: Option<u16>,
    pub last_mean: Option<f64>,
}

/// Sink that keeps [`BlockStats`] behind a shared handle.
///
/// Optionally forwards every block to an inner sink, so stats can be layered
/// over a CSV writer or renderer.
pub struct StatsSink {
    stats: Arc<Mutex<BlockStats>>,
    inner: Option<Box<dyn SampleSink>>,
}

impl StatsSink {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(Mutex::new(BlockStats::default())),
            inner: None,
        }
    }

    pub fn wrapping(inner: Box<dyn SampleSink>) -> Self {
        Self {
            inner: Some(inner),
            ..Self::new()
        }
    }

    /// Handle for reading the stats while the sink is owned by the pipeline.
    pub fn handle(&self) -> Arc<Mutex<BlockStats>> {
        Arc::clone(&self.stats)
    }
}

impl Default for StatsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSink for StatsSink {
    fn on_sample_block(&mut self, block: SampleBlock) -> Result<()> {
        {
            let mut stats = self.stats.lock();
            stats.blocks += 1;
            stats.samples += block.len() as u64;
            stats.last_seq = Some(block.seq);
            let min_max = block.min_max();
            stats.last_min = min_max.map(|(lo, _)| lo);
            stats.last_max = min_max.map(|(_, hi)| hi);
            stats.last_mean = block.mean();
        }
        match self.inner.as_mut() {
            Some(inner) => inner.on_sample_block(block),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.finish(),
            None => Ok(()),
        }
    }
}
