//! `capture` and `emulate` subcommands.

use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{select, Receiver, Sender};
use scopewire_core::{
    emulator::{Emulator, EmulatorConfig},
    error::Result as ScopeResult,
    sink::{CsvSink, LogReporter, NullSink, StatsSink, WindowSink},
    PipelineController, PipelineState, SampleBlock, SampleSink,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cli::{CaptureArgs, EmulateArgs};
use crate::config::{apply_overrides, default_config_path, load_config, save_config};

/// How often the wait loop checks whether the pipeline ended on its own.
const STATE_POLL: Duration = Duration::from_millis(100);

/// Console sink: logs a per-block summary at debug level, keeps stats, and
/// signals once the block limit is reached. Blocks past the limit are dropped
/// so the CSV and stats hold exactly that many.
struct CaptureSink {
    stats: StatsSink,
    window: Option<WindowSink>,
    limit: Option<u64>,
    delivered: u64,
    limit_tx: Sender<()>,
}

impl CaptureSink {
    fn new(
        stats: StatsSink,
        window: Option<WindowSink>,
        limit: Option<u64>,
        limit_tx: Sender<()>,
    ) -> Self {
        Self {
            stats,
            window,
            limit,
            delivered: 0,
            limit_tx,
        }
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.delivered >= limit)
    }
}

impl SampleSink for CaptureSink {
    fn on_sample_block(&mut self, block: SampleBlock) -> ScopeResult<()> {
        if self.limit_reached() {
            return Ok(());
        }
        if let Some((min, max)) = block.min_max() {
            debug!(
                seq = block.seq,
                samples = block.len(),
                min,
                max,
                mean = block.mean().unwrap_or_default(),
                "block"
            );
        }
        if let Some(window) = &mut self.window {
            window.on_sample_block(block.clone())?;
        }
        self.stats.on_sample_block(block)?;
        self.delivered += 1;
        if self.limit_reached() {
            info!(blocks = self.delivered, "block limit reached");
            let _ = self.limit_tx.try_send(());
        }
        Ok(())
    }

    fn finish(&mut self) -> ScopeResult<()> {
        self.stats.finish()
    }
}

/// Shape of the rolling window at the end of a capture.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WindowSummary {
    len: usize,
    total_samples: u64,
    min: Option<u16>,
    max: Option<u16>,
}

impl WindowSummary {
    fn of(window: &WindowSink) -> Self {
        let samples = window.snapshot();
        Self {
            len: samples.len(),
            total_samples: window.total_samples(),
            min: samples.iter().copied().min(),
            max: samples.iter().copied().max(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptureReport {
    state: PipelineState,
    diagnostics: scopewire_core::DiagnosticsSnapshot,
    stats: scopewire_core::sink::BlockStats,
    total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    window: Option<WindowSummary>,
}

pub fn capture(args: CaptureArgs, interrupt: Receiver<()>) -> anyhow::Result<()> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_config(&config_path)?;
    apply_overrides(&mut config, &args);

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    if let Some(path) = &args.save_config {
        save_config(path, &config).with_context(|| format!("saving {}", path.display()))?;
        info!(path = %path.display(), "configuration saved");
    }

    let inner: Box<dyn SampleSink> = match &args.csv {
        Some(path) => Box::new(
            CsvSink::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(NullSink),
    };
    let stats = StatsSink::wrapping(inner);
    let stats_handle = stats.handle();
    let window = args.window.map(WindowSink::new);
    let (limit_tx, limit_rx) = crossbeam_channel::bounded(1);
    let sink = CaptureSink::new(stats, window.clone(), args.max_frames, limit_tx);

    let controller = PipelineController::new(config);
    controller
        .start(sink, LogReporter::new())
        .context("starting capture")?;

    loop {
        select! {
            recv(interrupt) -> _ => {
                info!("interrupted");
                break;
            }
            recv(limit_rx) -> _ => break,
            default(STATE_POLL) => {
                if !controller.is_active() {
                    break;
                }
            }
        }
    }

    let state = controller.stop()?;
    let report = CaptureReport {
        state: state.clone(),
        diagnostics: controller.diagnostics_snapshot(),
        stats: *stats_handle.lock(),
        total_bytes: controller.meter().map(|m| m.total_bytes()).unwrap_or(0),
        window: window.as_ref().map(WindowSummary::of),
    };
    if let Some(summary) = &report.window {
        debug!(?summary, "display window");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    match state.failure_reason() {
        Some(reason) => anyhow::bail!("capture failed: {reason}"),
        None => Ok(()),
    }
}

pub fn emulate(args: EmulateArgs, interrupt: Receiver<()>) -> anyhow::Result<()> {
    let config = EmulatorConfig {
        bind: format!("{}:{}", args.bind, args.port),
        packing_mode: args.mode,
        frame_size: args.frame_size,
        rate_hz: args.rate_hz,
        waveform: args.waveform,
        period_samples: args.period,
        handshake_token: args.handshake,
        max_frames: args.max_frames,
    };
    let emulator = Emulator::bind(config).context("starting emulator")?;
    let stop = emulator.stop_signal();
    std::thread::Builder::new()
        .name("scopewire-interrupt".into())
        .spawn(move || {
            if interrupt.recv().is_ok() {
                info!("interrupted");
            }
            stop.trigger();
        })?;

    let frames = emulator.serve()?;
    if frames == 0 {
        warn!("no client was served");
    }
    Ok(())
}
