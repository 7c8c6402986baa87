//! Stage loops and the shared bookkeeping they report into.
//!
//! ## Stages (one OS thread each)
//!
//! ```text
//! 1. read    FrameSource::next_frame → meter.record_bytes → relay<RawFrame>
//! 2. decode  relay<RawFrame> → codec::decode → relay<SampleBlock>
//! 3. deliver relay<SampleBlock> → SampleSink::on_sample_block
//! 4. report  every interval: meter.sample_and_reset → ThroughputReporter
//! ```
//!
//! Only the relays and the meter's atomic counter cross stage boundaries.
//! Shutdown flows downstream: the reader closes its relay, each later stage
//! drains its input to end-of-stream and then closes its own output.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    buffering::{RawFrame, RelayReceiver, RelaySender, SampleBlock},
    codec::{self, PackingMode},
    engine::signal::StopSignal,
    error::{Result, ScopeError},
    events::{PipelineState, PipelineStateEvent},
    meter::ThroughputMeter,
    sink::{SampleSink, ThroughputReporter},
    source::FrameSource,
};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub frames_in: AtomicU64,
    pub bytes_in: AtomicU64,
    pub blocks_decoded: AtomicU64,
    pub blocks_out: AtomicU64,
    pub samples_out: AtomicU64,
    /// Times the reader found the raw-frame relay full and had to wait.
    pub relay_full_waits: AtomicU64,
    pub throughput_windows: AtomicU64,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.frames_in.store(0, Ordering::Relaxed);
        self.bytes_in.store(0, Ordering::Relaxed);
        self.blocks_decoded.store(0, Ordering::Relaxed);
        self.blocks_out.store(0, Ordering::Relaxed);
        self.samples_out.store(0, Ordering::Relaxed);
        self.relay_full_waits.store(0, Ordering::Relaxed);
        self.throughput_windows.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            blocks_decoded: self.blocks_decoded.load(Ordering::Relaxed),
            blocks_out: self.blocks_out.load(Ordering::Relaxed),
            samples_out: self.samples_out.load(Ordering::Relaxed),
            relay_full_waits: self.relay_full_waits.load(Ordering::Relaxed),
            throughput_windows: self.throughput_windows.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_in: u64,
    pub bytes_in: u64,
    pub blocks_decoded: u64,
    pub blocks_out: u64,
    pub samples_out: u64,
    pub relay_full_waits: u64,
    pub throughput_windows: u64,
}

/// Canonical pipeline state plus the broadcast channel that publishes it.
///
/// Every transition happens under one lock, so subscribers observe events in
/// the same order the state changed.
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<Mutex<StateInner>>,
    tx: broadcast::Sender<PipelineStateEvent>,
}

struct StateInner {
    state: PipelineState,
    seq: u64,
}

impl StateHandle {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(StateInner {
                state: PipelineState::Idle,
                seq: 0,
            })),
            tx,
        }
    }

    pub fn get(&self) -> PipelineState {
        self.inner.lock().state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineStateEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn set(&self, state: PipelineState, detail: Option<String>) {
        let mut inner = self.inner.lock();
        self.publish(&mut inner, state, detail);
    }

    /// `Running → Draining`. No-op from any other state.
    pub(crate) fn begin_drain(&self, detail: &str) {
        let mut inner = self.inner.lock();
        if inner.state == PipelineState::Running {
            self.publish(&mut inner, PipelineState::Draining, Some(detail.to_string()));
        }
    }

    /// Record a failure. Only the first failure of a run is kept.
    pub(crate) fn fail(&self, reason: String) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_failed() {
            debug!(%reason, "additional failure ignored");
            return false;
        }
        self.publish(&mut inner, PipelineState::Failed(reason), None);
        true
    }

    /// `Running | Draining → Stopped`. A failed run stays failed.
    pub(crate) fn finish(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, PipelineState::Running | PipelineState::Draining) {
            self.publish(&mut inner, PipelineState::Stopped, None);
        }
    }

    fn publish(&self, inner: &mut StateInner, state: PipelineState, detail: Option<String>) {
        info!(from = %inner.state, to = %state, "pipeline state change");
        inner.state = state.clone();
        inner.seq += 1;
        // No subscribers is fine.
        let _ = self.tx.send(PipelineStateEvent {
            seq: inner.seq,
            state,
            detail,
        });
    }
}

/// Everything a stage needs besides its own input and output.
#[derive(Clone)]
pub struct StageContext {
    pub state: StateHandle,
    /// Set by `stop()` or on the first failure.
    pub stop: StopSignal,
    /// Set when the read stage exits; ends the report stage.
    pub source_done: StopSignal,
    pub meter: Arc<ThroughputMeter>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

impl StageContext {
    pub fn new(state: StateHandle) -> Self {
        Self {
            state,
            stop: StopSignal::new(),
            source_done: StopSignal::new(),
            meter: Arc::new(ThroughputMeter::new()),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        }
    }

    /// Mark the run failed and ask every stage to wind down.
    pub(crate) fn fail(&self, stage: &str, err: &ScopeError) {
        if self.state.fail(format!("{stage}: {err}")) {
            error!(stage, "pipeline failed: {err}");
        }
        self.stop.trigger();
    }
}

/// How the read stage ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// The peer closed the connection.
    PeerClosed,
    /// The stop signal was observed.
    Stopped,
}

/// Stage 1: pull frames from the socket and hand them downstream.
///
/// The source is dropped (closing its socket) before this returns, on every
/// path.
pub fn read_loop(
    mut source: Box<dyn FrameSource>,
    mut out: RelaySender<RawFrame>,
    ctx: &StageContext,
) -> Result<ReadEnd> {
    let peer = source.peer_addr();
    info!(peer = %peer, transport = %source.transport(), "read stage started");

    let end = loop {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) if ctx.stop.is_triggered() => break ReadEnd::Stopped,
            Ok(None) => break ReadEnd::PeerClosed,
            Err(e) => {
                drop(source);
                out.close();
                ctx.fail("read", &e);
                return Err(e);
            }
        };

        ctx.meter.record_bytes(frame.len());
        ctx.diagnostics.frames_in.fetch_add(1, Ordering::Relaxed);
        ctx.diagnostics
            .bytes_in
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        if out.is_full() {
            ctx.diagnostics
                .relay_full_waits
                .fetch_add(1, Ordering::Relaxed);
        }

        if let Err(e) = out.send(frame) {
            if ctx.stop.is_triggered() {
                debug!("decode stage gone during shutdown");
                break ReadEnd::Stopped;
            }
            warn!("raw frame relay closed while the pipeline was running");
            drop(source);
            ctx.fail("read", &e);
            return Err(e);
        }
    };

    drop(source);
    out.close();
    info!(peer = %peer, ?end, "read stage finished");
    Ok(end)
}

/// Stage 2: decode frames in arrival order.
pub fn decode_loop(
    input: RelayReceiver<RawFrame>,
    mut out: RelaySender<SampleBlock>,
    mode: PackingMode,
    ctx: &StageContext,
) -> Result<()> {
    debug!(%mode, "decode stage started");
    for frame in input.iter() {
        let block = codec::decode(&frame, mode);
        ctx.diagnostics
            .blocks_decoded
            .fetch_add(1, Ordering::Relaxed);
        if out.send(block).is_err() {
            // The deliver stage only leaves early after its own failure (or
            // panic), which it records itself.
            debug!("deliver stage gone, stopping");
            ctx.stop.trigger();
            return Ok(());
        }
    }
    out.close();
    debug!("decode stage drained");
    Ok(())
}

/// Stage 3: hand blocks to the sink, one call per block.
pub fn deliver_loop(
    input: RelayReceiver<SampleBlock>,
    mut sink: Box<dyn SampleSink>,
    ctx: &StageContext,
) -> Result<()> {
    for block in input.iter() {
        let samples = block.len() as u64;
        if let Err(e) = sink.on_sample_block(block) {
            ctx.fail("sink", &e);
            return Err(e);
        }
        ctx.diagnostics.blocks_out.fetch_add(1, Ordering::Relaxed);
        ctx.diagnostics
            .samples_out
            .fetch_add(samples, Ordering::Relaxed);
    }
    if let Err(e) = sink.finish() {
        ctx.fail("sink", &e);
        return Err(e);
    }
    debug!("deliver stage drained");
    Ok(())
}

/// Stage 4: emit one throughput sample per interval until the reader exits,
/// then one final sample covering whatever is left.
pub fn report_loop(
    mut reporter: Box<dyn ThroughputReporter>,
    interval: Duration,
    ctx: &StageContext,
) {
    while !ctx.source_done.wait_timeout(interval) {
        reporter.on_throughput_sample(ctx.meter.sample_and_reset());
        ctx.diagnostics
            .throughput_windows
            .fetch_add(1, Ordering::Relaxed);
    }
    let last = ctx.meter.sample_and_reset();
    if last.bytes > 0 {
        reporter.on_throughput_sample(last);
        ctx.diagnostics
            .throughput_windows
            .fetch_add(1, Ordering::Relaxed);
    }
    debug!("report stage finished");
}

/// Counts live stages; the last one out settles the final state.
///
/// Runs on drop, so a panicking stage still releases its slot.
pub(crate) struct StageGuard {
    name: &'static str,
    live: Arc<AtomicUsize>,
    ctx: StageContext,
}

impl StageGuard {
    pub(crate) fn new(name: &'static str, live: Arc<AtomicUsize>, ctx: StageContext) -> Self {
        Self { name, live, ctx }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let err = ScopeError::StageFailed(format!("{} stage panicked", self.name));
            self.ctx.fail(self.name, &err);
        }
        if self.name == "read" {
            self.ctx.source_done.trigger();
        }
        if self.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.ctx.state.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::relay;
    use crate::meter::ThroughputSample;
    use crate::source::Transport;
    use std::collections::VecDeque;
    use std::net::SocketAddr;

    /// Source replaying a fixed script of results.
    struct ScriptedSource {
        script: VecDeque<Result<Option<RawFrame>>>,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<RawFrame>> {
            self.script.pop_front().unwrap_or(Ok(None))
        }

        fn transport(&self) -> Transport {
            Transport::Tcp
        }

        fn peer_addr(&self) -> SocketAddr {
            "127.0.0.1:9".parse().unwrap()
        }
    }

    fn running_ctx() -> StageContext {
        let ctx = StageContext::new(StateHandle::new(16));
        ctx.state.set(PipelineState::Running, None);
        ctx
    }

    #[test]
    fn read_loop_forwards_frames_and_counts_bytes() {
        let ctx = running_ctx();
        let source = ScriptedSource {
            script: VecDeque::from(vec![
                Ok(Some(RawFrame::new(0, vec![1, 2, 3]))),
                Ok(Some(RawFrame::new(1, vec![4, 5]))),
            ]),
        };
        let (tx, rx) = relay(4);

        let end = read_loop(Box::new(source), tx, &ctx).unwrap();
        assert_eq!(end, ReadEnd::PeerClosed);
        assert_eq!(rx.recv().unwrap().seq(), 0);
        assert_eq!(rx.recv().unwrap().seq(), 1);
        assert!(rx.recv().is_none());
        assert_eq!(ctx.meter.total_bytes(), 5);
        assert_eq!(ctx.diagnostics.snapshot().frames_in, 2);
    }

    #[test]
    fn read_error_fails_pipeline_and_closes_relay() {
        let ctx = running_ctx();
        let source = ScriptedSource {
            script: VecDeque::from(vec![
                Ok(Some(RawFrame::new(0, vec![0xAB, 0xCD, 0xEF]))),
                Err(ScopeError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "reset by peer",
                ))),
            ]),
        };
        let (tx, rx) = relay(4);

        assert!(read_loop(Box::new(source), tx, &ctx).is_err());
        assert!(ctx.stop.is_triggered());
        let reason = ctx.state.get().failure_reason().map(str::to_owned).unwrap();
        assert!(reason.contains("reset by peer"), "reason: {reason}");
        // The frame read before the error is still delivered.
        assert_eq!(rx.recv().unwrap().seq(), 0);
        assert!(rx.recv().is_none());
    }

    #[test]
    fn decode_loop_preserves_order() {
        let ctx = running_ctx();
        let (mut raw_tx, raw_rx) = relay(8);
        let (block_tx, block_rx) = relay(8);
        for seq in 0..5u64 {
            raw_tx
                .send(RawFrame::new(seq, codec::encode_packed12(&[seq as u16, 7])))
                .unwrap();
        }
        raw_tx.close();

        decode_loop(raw_rx, block_tx, PackingMode::Packed12, &ctx).unwrap();
        let seqs: Vec<u64> = block_rx.iter().map(|b| b.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn sink_error_fails_pipeline() {
        let ctx = running_ctx();
        let (mut tx, rx) = relay(2);
        tx.send(SampleBlock::new(0, PackingMode::Raw16, vec![1])).unwrap();
        tx.close();

        let sink = |_b: SampleBlock| -> Result<()> { Err(ScopeError::Sink("disk full".into())) };
        assert!(deliver_loop(rx, Box::new(sink), &ctx).is_err());
        assert!(ctx.state.get().is_failed());
        assert!(ctx.stop.is_triggered());
    }

    #[test]
    fn report_loop_flushes_final_window() {
        let ctx = running_ctx();
        let (tx, rx) = crossbeam_channel::unbounded();
        ctx.meter.record_bytes(42);
        ctx.source_done.trigger();

        report_loop(
            Box::new(move |s: ThroughputSample| tx.send(s).unwrap()),
            Duration::from_secs(10),
            &ctx,
        );
        let last = rx.try_recv().expect("final window");
        assert_eq!(last.bytes, 42);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn diagnostics_reset_zeroes_every_counter() {
        let diag = PipelineDiagnostics::default();
        diag.frames_in.fetch_add(3, Ordering::Relaxed);
        diag.relay_full_waits.fetch_add(1, Ordering::Relaxed);
        assert_eq!(diag.snapshot().frames_in, 3);
        diag.reset();
        assert_eq!(diag.snapshot(), PipelineDiagnostics::default().snapshot());
    }

    #[test]
    fn state_events_are_ordered_and_first_failure_wins() {
        let state = StateHandle::new(16);
        let mut rx = state.subscribe();
        state.set(PipelineState::Running, None);
        state.begin_drain("stop requested");
        assert!(state.fail("first".into()));
        assert!(!state.fail("second".into()));
        state.finish();

        let kinds: Vec<PipelineState> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.state)
            .collect();
        assert_eq!(
            kinds,
            vec![
                PipelineState::Running,
                PipelineState::Draining,
                PipelineState::Failed("first".into()),
            ]
        );
        assert_eq!(state.get(), PipelineState::Failed("first".into()));
    }
}
