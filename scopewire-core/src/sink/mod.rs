//! Consumer contracts for decoded samples and throughput windows.
//!
//! Rendering, storage and reporting live outside this crate. The pipeline
//! only needs something that implements [`SampleSink`] (one call per decoded
//! frame, in arrival order) and [`ThroughputReporter`] (one call per window).
//!
//! A sink that blocks stalls the decode stage, which fills the relays and
//! eventually stops socket reads. That is the intended congestion control,
//! but a sink must never block forever or `stop()` cannot complete.

pub mod csv;
pub mod stats;
pub mod window;

use crossbeam_channel::Sender;
use tracing::info;

use crate::{
    buffering::SampleBlock,
    error::{Result, ScopeError},
    meter::ThroughputSample,
};

pub use csv::CsvSink;
pub use stats::{BlockStats, StatsSink};
pub use window::WindowSink;

/// Receives decoded sample blocks in frame order.
pub trait SampleSink: Send + 'static {
    /// Called once per decoded frame.
    ///
    /// # Errors
    /// Any error fails the pipeline with `ScopeError::Sink`.
    fn on_sample_block(&mut self, block: SampleBlock) -> Result<()>;

    /// Called once after the last block, before the decode stage exits.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> SampleSink for F
where
    F: FnMut(SampleBlock) -> Result<()> + Send + 'static,
{
    fn on_sample_block(&mut self, block: SampleBlock) -> Result<()> {
        self(block)
    }
}

/// Receives one throughput measurement per reporting window.
pub trait ThroughputReporter: Send + 'static {
    fn on_throughput_sample(&mut self, sample: ThroughputSample);
}

impl<F> ThroughputReporter for F
where
    F: FnMut(ThroughputSample) + Send + 'static,
{
    fn on_throughput_sample(&mut self, sample: ThroughputSample) {
        self(sample)
    }
}

/// Forwards blocks to another thread, e.g. a renderer.
///
/// With a bounded channel the receiver's pace propagates back through the
/// pipeline like any other slow sink.
pub struct ChannelSink {
    tx: Sender<SampleBlock>,
}

impl ChannelSink {
    pub fn new(tx: Sender<SampleBlock>) -> Self {
        Self { tx }
    }
}

impl SampleSink for ChannelSink {
    fn on_sample_block(&mut self, block: SampleBlock) -> Result<()> {
        self.tx
            .send(block)
            .map_err(|_| ScopeError::Sink("sample block receiver disconnected".into()))
    }
}

/// Logs each window at `info` level.
#[derive(Debug, Default)]
pub struct LogReporter {
    windows: u64,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThroughputReporter for LogReporter {
    fn on_throughput_sample(&mut self, sample: ThroughputSample) {
        self.windows += 1;
        info!(
            window = self.windows,
            bytes = sample.bytes,
            secs = sample.window_secs,
            kib_per_sec = sample.kib_per_sec(),
            "throughput"
        );
    }
}

/// Sink that discards everything. Useful for raw throughput measurements.
#[derive(Debug, Default)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn on_sample_block(&mut self, _block: SampleBlock) -> Result<()> {
        Ok(())
    }
}
