//! # scopewire-core
//!
//! Streaming sample acquisition from networked ADC instruments.
//!
//! ## Architecture
//!
//! ```text
//! TCP/UDP socket → FrameSource ─(RawFrame)─► relay ─► decode(SampleCodec)
//!       │                                               │
//!  ThroughputMeter ◄── bytes                      (SampleBlock)
//!       │                                               │
//!  report stage → ThroughputReporter          relay ─► deliver → SampleSink
//!
//!  PipelineController: start / stop / wait, broadcast::Sender<PipelineStateEvent>
//! ```
//!
//! Each stage runs on its own thread. The relays are bounded, so a slow sink
//! backs the whole chain up to the socket instead of growing memory.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod codec;
pub mod emulator;
pub mod engine;
pub mod error;
pub mod events;
pub mod meter;
pub mod sink;
pub mod source;

// Convenience re-exports for downstream crates
pub use buffering::{RawFrame, SampleBlock};
pub use codec::PackingMode;
pub use engine::{DiagnosticsSnapshot, PipelineConfig, PipelineController, StopSignal};
pub use error::ScopeError;
pub use events::{PipelineState, PipelineStateEvent};
pub use meter::{ThroughputMeter, ThroughputSample};
pub use sink::{SampleSink, ThroughputReporter};
pub use source::{FrameSource, SourceOptions, Transport};
