//! `PipelineController`: top-level lifecycle owner.
//!
//! ## Lifecycle
//!
//! ```text
//! PipelineController::new(config)              state = Idle
//!     └─► start(sink, reporter)                connect, spawn stages → Running
//!         ├─► stop()                           Draining → (stages drain) → Stopped
//!         ├─► peer closes                      Draining → (stages drain) → Stopped
//!         └─► socket / sink error              Failed(reason) → (stages drain)
//! ```
//!
//! `stop()` is idempotent and may be called from any thread. Called from one
//! of the pipeline's own stage threads (a sink reacting to an error, say), it
//! only signals; the join happens in a later `stop()` or `wait()` from
//! outside. After `Stopped` or `Failed`, `start()` may be called again for a
//! fresh connection; the pipeline never reconnects on its own.

pub mod config;
pub mod pipeline;
pub mod signal;

use std::sync::{atomic::AtomicUsize, Arc};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    buffering::relay,
    error::{Result, ScopeError},
    events::{PipelineState, PipelineStateEvent},
    meter::ThroughputMeter,
    sink::{SampleSink, ThroughputReporter},
    source::{self, FrameSource},
};

pub use config::PipelineConfig;
pub use pipeline::{DiagnosticsSnapshot, PipelineDiagnostics, ReadEnd, StageContext, StateHandle};
pub use signal::StopSignal;

/// Broadcast channel capacity for state events buffered for slow subscribers.
const STATE_EVENT_CAP: usize = 64;

struct RunHandles {
    ctx: StageContext,
    threads: Vec<JoinHandle<()>>,
}

impl RunHandles {
    fn owns_current_thread(&self) -> bool {
        let me: ThreadId = thread::current().id();
        self.threads.iter().any(|h| h.thread().id() == me)
    }
}

pub struct PipelineController {
    config: PipelineConfig,
    state: StateHandle,
    run: Mutex<Option<RunHandles>>,
    /// Held from the state check until the stages are spawned, so two
    /// `start()` calls cannot both pass the check while one is connecting.
    starting: Mutex<()>,
    /// Meter and diagnostics of the most recent run.
    last_ctx: Mutex<Option<StageContext>>,
}

impl PipelineController {
    /// Create an idle controller. The config is normalized here.
    pub fn new(mut config: PipelineConfig) -> Self {
        config.normalize();
        Self {
            config,
            state: StateHandle::new(STATE_EVENT_CAP),
            run: Mutex::new(None),
            starting: Mutex::new(()),
            last_ctx: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Connect to the configured instrument and start all stages.
    ///
    /// Blocks until the connection is established (or fails); streaming then
    /// continues on background threads.
    ///
    /// # Errors
    /// - `ScopeError::AlreadyRunning` if a run is active. A call that overlaps
    ///   another `start()` waits for it and then sees the run it launched.
    /// - `ScopeError::InvalidConfig` for an unusable configuration.
    /// - `ScopeError::Connect` if the instrument is unreachable. The state
    ///   becomes `Failed` with the connect error as reason.
    pub fn start<S, R>(&self, sink: S, reporter: R) -> Result<()>
    where
        S: SampleSink,
        R: ThroughputReporter,
    {
        let _starting = self.starting.lock();
        self.ensure_startable()?;
        self.config.validate()?;

        let ctx = StageContext::new(self.state.clone());
        let addr = self.config.address();
        info!(addr = %addr, transport = %self.config.transport, "connecting");
        let source = match source::connect(
            &addr,
            self.config.transport,
            self.config.source_options(),
            ctx.stop.clone(),
        ) {
            Ok(source) => source,
            Err(e) => {
                self.state
                    .set(PipelineState::Failed(e.to_string()), Some(addr));
                return Err(e);
            }
        };
        self.launch(ctx, source, Box::new(sink), Box::new(reporter))
    }

    /// Start the stages on an already-open source.
    ///
    /// `make_source` receives the run's stop signal; a custom source must
    /// return `Ok(None)` from `next_frame` once it is triggered, the way
    /// sources built by [`source::connect`] do.
    pub fn start_with_source<F>(
        &self,
        make_source: F,
        sink: Box<dyn SampleSink>,
        reporter: Box<dyn ThroughputReporter>,
    ) -> Result<()>
    where
        F: FnOnce(StopSignal) -> Result<Box<dyn FrameSource>>,
    {
        let _starting = self.starting.lock();
        self.ensure_startable()?;
        let ctx = StageContext::new(self.state.clone());
        let source = match make_source(ctx.stop.clone()) {
            Ok(source) => source,
            Err(e) => {
                self.state.set(PipelineState::Failed(e.to_string()), None);
                return Err(e);
            }
        };
        self.launch(ctx, source, sink, reporter)
    }

    /// Request a drain and wait for every stage to exit.
    ///
    /// Returns the terminal state (`Stopped`, or `Failed` if a stage failed
    /// along the way). Calling it again, or when nothing is running, just
    /// returns the current state. If another thread is already blocked in
    /// [`PipelineController::wait`], this only signals and that thread joins.
    pub fn stop(&self) -> Result<PipelineState> {
        if let Some(ctx) = self.last_ctx.lock().as_ref() {
            self.state.begin_drain("stop requested");
            ctx.stop.trigger();
        }
        let handles = {
            let mut run = self.run.lock();
            match run.as_ref() {
                None => return Ok(self.state.get()),
                Some(h) if h.owns_current_thread() => return Ok(self.state.get()),
                Some(_) => run.take(),
            }
        };
        info!("stop requested, draining");
        self.join(handles)
    }

    /// Wait for the stages to exit on their own (e.g. the peer closed the
    /// stream) without requesting a stop.
    pub fn wait(&self) -> Result<PipelineState> {
        let handles = {
            let mut run = self.run.lock();
            match run.as_ref() {
                None => return Ok(self.state.get()),
                Some(h) if h.owns_current_thread() => return Ok(self.state.get()),
                Some(_) => run.take(),
            }
        };
        self.join(handles)
    }

    /// Current state (snapshot).
    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// `true` while a run's stages may still be executing.
    pub fn is_active(&self) -> bool {
        !self.state.get().is_terminal()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<PipelineStateEvent> {
        self.state.subscribe()
    }

    /// Counters of the current or most recent run.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.last_ctx
            .lock()
            .as_ref()
            .map(|ctx| ctx.diagnostics.snapshot())
            .unwrap_or_else(|| PipelineDiagnostics::default().snapshot())
    }

    /// Throughput meter of the current or most recent run.
    pub fn meter(&self) -> Option<Arc<ThroughputMeter>> {
        self.last_ctx
            .lock()
            .as_ref()
            .map(|ctx| Arc::clone(&ctx.meter))
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn ensure_startable(&self) -> Result<()> {
        if !self.state.get().is_terminal() {
            return Err(ScopeError::AlreadyRunning);
        }
        // Reap a finished run nobody waited for.
        let finished = self.run.lock().take();
        if let Some(handles) = finished {
            self.join(Some(handles))?;
        }
        Ok(())
    }

    fn launch(
        &self,
        ctx: StageContext,
        source: Box<dyn FrameSource>,
        sink: Box<dyn SampleSink>,
        reporter: Box<dyn ThroughputReporter>,
    ) -> Result<()> {
        let capacity = self.config.relay_capacity;
        let (raw_tx, raw_rx) = relay(capacity);
        let (block_tx, block_rx) = relay(capacity);
        let mode = self.config.packing_mode;
        let interval = self.config.report_interval();
        let live = Arc::new(AtomicUsize::new(4));

        let peer = source.peer_addr();
        self.state
            .set(PipelineState::Running, Some(peer.to_string()));
        *self.last_ctx.lock() = Some(ctx.clone());

        let mut threads = Vec::with_capacity(4);
        let spawned = (|| -> Result<()> {
            threads.push(spawn_stage("read", &live, &ctx, move |ctx| {
                if let Ok(ReadEnd::PeerClosed) = pipeline::read_loop(source, raw_tx, ctx) {
                    ctx.state.begin_drain("peer closed connection");
                }
            })?);
            threads.push(spawn_stage("decode", &live, &ctx, move |ctx| {
                let _ = pipeline::decode_loop(raw_rx, block_tx, mode, ctx);
            })?);
            threads.push(spawn_stage("deliver", &live, &ctx, move |ctx| {
                let _ = pipeline::deliver_loop(block_rx, sink, ctx);
            })?);
            threads.push(spawn_stage("report", &live, &ctx, move |ctx| {
                pipeline::report_loop(reporter, interval, ctx);
            })?);
            Ok(())
        })();

        if let Err(e) = spawned {
            // Stages that did start see the stop and wind down; the ones that
            // never started still hold a slot in `live`, so settle the state
            // here.
            ctx.fail("spawn", &e);
            ctx.source_done.trigger();
            for handle in threads {
                let _ = handle.join();
            }
            return Err(e);
        }

        info!(
            peer = %peer,
            mode = %mode,
            capacity,
            interval_secs = interval.as_secs_f64(),
            "pipeline running"
        );
        *self.run.lock() = Some(RunHandles { ctx, threads });
        Ok(())
    }

    fn join(&self, handles: Option<RunHandles>) -> Result<PipelineState> {
        let Some(handles) = handles else {
            return Ok(self.state.get());
        };
        for handle in handles.threads {
            let name = handle.thread().name().unwrap_or("stage").to_string();
            if handle.join().is_err() {
                warn!(stage = %name, "stage thread panicked");
                handles.ctx.state.fail(format!("{name} panicked"));
            }
        }
        let state = self.state.get();
        info!(state = %state, "pipeline exited");
        Ok(state)
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn spawn_stage<F>(
    name: &'static str,
    live: &Arc<AtomicUsize>,
    ctx: &StageContext,
    body: F,
) -> Result<JoinHandle<()>>
where
    F: FnOnce(&StageContext) + Send + 'static,
{
    let guard = pipeline::StageGuard::new(name, Arc::clone(live), ctx.clone());
    let ctx = ctx.clone();
    thread::Builder::new()
        .name(format!("scopewire-{name}"))
        .spawn(move || {
            let _guard = guard;
            body(&ctx);
        })
        .map_err(ScopeError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{RawFrame, SampleBlock};
    use crate::source::Transport;
    use std::net::SocketAddr;
    use std::sync::Weak;
    use std::time::Duration;

    /// Produces small frames until stopped.
    struct EndlessSource {
        seq: u64,
        stop: StopSignal,
    }

    impl FrameSource for EndlessSource {
        fn next_frame(&mut self) -> Result<Option<RawFrame>> {
            if self.stop.is_triggered() {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(1));
            let frame = RawFrame::new(self.seq, vec![0x12, 0x34, 0x56]);
            self.seq += 1;
            Ok(Some(frame))
        }

        fn transport(&self) -> Transport {
            Transport::Tcp
        }

        fn peer_addr(&self) -> SocketAddr {
            "127.0.0.1:8080".parse().unwrap()
        }
    }

    fn endless(stop: StopSignal) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(EndlessSource { seq: 0, stop }))
    }

    fn quiet_reporter() -> Box<dyn ThroughputReporter> {
        Box::new(|_s: crate::meter::ThroughputSample| {})
    }

    #[test]
    fn stop_and_wait_when_idle_return_idle() {
        let controller = PipelineController::new(PipelineConfig::default());
        assert_eq!(controller.stop().unwrap(), PipelineState::Idle);
        assert_eq!(controller.wait().unwrap(), PipelineState::Idle);
        assert_eq!(controller.diagnostics_snapshot().frames_in, 0);
    }

    #[test]
    fn source_factory_error_marks_failed() {
        let controller = PipelineController::new(PipelineConfig::default());
        let err = controller
            .start_with_source(
                |_stop| Err(ScopeError::StageFailed("no instrument".into())),
                Box::new(crate::sink::NullSink),
                quiet_reporter(),
            )
            .unwrap_err();
        assert!(matches!(err, ScopeError::StageFailed(_)));
        assert!(controller.state().is_failed());
    }

    #[test]
    fn stop_from_a_stage_thread_only_signals() {
        let controller = Arc::new(PipelineController::new(PipelineConfig::default()));
        let weak: Weak<PipelineController> = Arc::downgrade(&controller);
        let mut seen = 0u32;
        let sink = move |_block: SampleBlock| -> Result<()> {
            seen += 1;
            if seen == 3 {
                if let Some(c) = weak.upgrade() {
                    // Must not deadlock joining its own thread.
                    assert_eq!(c.stop()?, PipelineState::Draining);
                }
            }
            Ok(())
        };

        controller
            .start_with_source(endless, Box::new(sink), quiet_reporter())
            .unwrap();
        assert_eq!(controller.wait().unwrap(), PipelineState::Stopped);
        let diag = controller.diagnostics_snapshot();
        assert!(diag.blocks_out >= 3);
        assert_eq!(diag.blocks_out, diag.frames_in);
    }

    #[test]
    fn panicking_sink_fails_the_run() {
        let controller = PipelineController::new(PipelineConfig::default());
        let sink = |_block: SampleBlock| -> Result<()> { panic!("renderer bug") };
        controller
            .start_with_source(endless, Box::new(sink), quiet_reporter())
            .unwrap();

        let state = controller.wait().unwrap();
        let reason = state.failure_reason().expect("failed state");
        assert!(reason.contains("panicked"), "{reason}");
    }

    #[test]
    fn restart_after_stop_resets_diagnostics() {
        let controller = PipelineController::new(PipelineConfig::default());
        for _ in 0..2 {
            controller
                .start_with_source(endless, Box::new(crate::sink::NullSink), quiet_reporter())
                .unwrap();
            assert!(controller.is_active());
            thread::sleep(Duration::from_millis(30));
            assert_eq!(controller.stop().unwrap(), PipelineState::Stopped);
        }
        let diag = controller.diagnostics_snapshot();
        assert!(diag.frames_in > 0);
        assert!(controller.meter().is_some());
    }

    #[test]
    fn overlapping_starts_launch_a_single_run() {
        let controller = Arc::new(PipelineController::new(PipelineConfig::default()));
        let signals: Arc<Mutex<Vec<StopSignal>>> = Arc::new(Mutex::new(Vec::new()));

        let starters: Vec<_> = (0..2)
            .map(|_| {
                let controller = Arc::clone(&controller);
                let signals = Arc::clone(&signals);
                thread::spawn(move || {
                    controller.start_with_source(
                        move |stop| {
                            signals.lock().push(stop.clone());
                            // Slow connect: the other caller arrives meanwhile.
                            thread::sleep(Duration::from_millis(200));
                            endless(stop)
                        },
                        Box::new(crate::sink::NullSink),
                        quiet_reporter(),
                    )
                })
            })
            .collect();
        let results: Vec<Result<()>> = starters.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ScopeError::AlreadyRunning))));

        assert_eq!(controller.stop().unwrap(), PipelineState::Stopped);
        let signals = signals.lock();
        assert_eq!(signals.len(), 1);
        assert!(signals.iter().all(StopSignal::is_triggered));
    }
}
