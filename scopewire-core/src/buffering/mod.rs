//! Units of work and the bounded hand-offs that carry them between stages.
//!
//! ```text
//! FrameSource ──RawFrame──► relay ──► decode ──SampleBlock──► relay ──► SampleSink
//! ```
//!
//! Every relay is bounded: a slow consumer blocks its producer instead of
//! growing a queue without limit.

pub mod frame;
pub mod relay;
pub mod window;

pub use frame::{RawFrame, SampleBlock};
pub use relay::{relay, RelayReceiver, RelaySender, DEFAULT_RELAY_CAPACITY};
pub use window::SampleWindow;
