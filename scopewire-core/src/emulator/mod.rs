//! Instrument emulator: a TCP server that streams synthetic ADC frames.
//!
//! Behaves like the acquisition firmware's socket task. It accepts one client
//! at a time, optionally waits for a handshake token, then writes fixed-size
//! frames of a 12-bit test waveform until the client disconnects, the frame
//! limit is reached, or the emulator is stopped. Used by `scopewire emulate`
//! and by the loopback tests.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    codec::{self, PackingMode},
    engine::StopSignal,
    error::{Result, ScopeError},
    source::is_timeout,
};

/// How often blocked accept/read/write calls re-check the stop signal.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Test signal shapes. Amplitude spans the full 12-bit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Square,
    Triangle,
    Sawtooth,
}

impl std::str::FromStr for Waveform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "square" => Ok(Waveform::Square),
            "triangle" => Ok(Waveform::Triangle),
            "sawtooth" | "saw" => Ok(Waveform::Sawtooth),
            other => Err(format!("unknown waveform: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EmulatorConfig {
    /// Listen address. Default `0.0.0.0:8080`.
    pub bind: String,
    pub packing_mode: PackingMode,
    /// Bytes per frame written to the client. Default: 3072.
    pub frame_size: usize,
    /// Frames per second; `0.0` streams as fast as the socket accepts.
    pub rate_hz: f64,
    pub waveform: Waveform,
    /// Samples per waveform period. Default: 64.
    pub period_samples: usize,
    /// Wait for this token before streaming.
    pub handshake_token: Option<String>,
    /// Close each client after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            packing_mode: PackingMode::Packed12,
            frame_size: 3072,
            rate_hz: 100.0,
            waveform: Waveform::Square,
            period_samples: 64,
            handshake_token: None,
            max_frames: None,
        }
    }
}

/// Stateful sample generator, continuous across frames.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    waveform: Waveform,
    period: usize,
    phase: usize,
}

impl SignalGenerator {
    pub fn new(waveform: Waveform, period_samples: usize) -> Self {
        Self {
            waveform,
            period: period_samples.max(2),
            phase: 0,
        }
    }

    pub fn next_sample(&mut self) -> u16 {
        const MAX: usize = 0x0FFF;
        let p = self.period;
        let i = self.phase;
        self.phase = (self.phase + 1) % p;
        let value = match self.waveform {
            Waveform::Square => {
                if i < p / 2 {
                    MAX
                } else {
                    0
                }
            }
            Waveform::Sawtooth => i * MAX / (p - 1),
            Waveform::Triangle => {
                let half = p / 2;
                if i < half {
                    i * MAX / half
                } else {
                    (p - i) * MAX / (p - half)
                }
            }
        };
        value.min(MAX) as u16
    }

    /// Encode one frame of exactly `frame_size` bytes. Bytes left over after
    /// the last whole sample are zero.
    pub fn frame(&mut self, mode: PackingMode, frame_size: usize) -> Vec<u8> {
        let count = mode.samples_in(frame_size);
        let samples: Vec<u16> = (0..count).map(|_| self.next_sample()).collect();
        let mut bytes = codec::encode(&samples, mode);
        bytes.resize(frame_size, 0);
        bytes
    }
}

/// Why one client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ClientGone,
    FrameLimit,
    Stopped,
}

pub struct Emulator {
    listener: TcpListener,
    config: EmulatorConfig,
    stop: StopSignal,
}

impl Emulator {
    /// Bind the listen socket. Use port 0 to let the OS pick one.
    pub fn bind(config: EmulatorConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind).map_err(|source| ScopeError::Connect {
            addr: config.bind.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            config,
            stop: StopSignal::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Trigger to make [`Emulator::serve`] return.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Serve clients one after another until stopped. Returns the total
    /// number of frames written.
    pub fn serve(&self) -> Result<u64> {
        info!(
            addr = %self.local_addr()?,
            mode = %self.config.packing_mode,
            frame_size = self.config.frame_size,
            rate_hz = self.config.rate_hz,
            "emulator listening"
        );
        let mut total = 0u64;
        while !self.stop.is_triggered() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "client connected");
                    let mut sent = 0u64;
                    let end = self.session(stream, &mut sent);
                    total += sent;
                    match end {
                        Ok(end) => info!(peer = %peer, frames = sent, ?end, "client session ended"),
                        Err(e) => warn!(peer = %peer, frames = sent, "client session failed: {e}"),
                    }
                }
                Err(e) if is_timeout(&e) => {
                    self.stop.wait_timeout(POLL_INTERVAL);
                }
                Err(e) => return Err(ScopeError::Io(e)),
            }
        }
        info!(frames = total, "emulator stopped");
        Ok(total)
    }

    /// Run [`Emulator::serve`] on a background thread.
    pub fn spawn(self) -> Result<EmulatorHandle> {
        let addr = self.local_addr()?;
        let stop = self.stop_signal();
        let thread = thread::Builder::new()
            .name("scopewire-emulator".into())
            .spawn(move || self.serve())?;
        Ok(EmulatorHandle {
            addr,
            stop,
            thread: Some(thread),
        })
    }

    fn session(&self, mut stream: TcpStream, sent: &mut u64) -> Result<SessionEnd> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        stream.set_write_timeout(Some(POLL_INTERVAL))?;

        if let Some(token) = self.config.handshake_token.as_deref() {
            if !self.await_token(&mut stream, token.as_bytes())? {
                return Ok(SessionEnd::Stopped);
            }
            debug!("handshake accepted");
        }

        let frame_size = self.config.frame_size.max(1);
        let period = (self.config.rate_hz.is_finite() && self.config.rate_hz > 0.0)
            .then(|| Duration::from_secs_f64(1.0 / self.config.rate_hz));
        let mut generator = SignalGenerator::new(self.config.waveform, self.config.period_samples);

        loop {
            if self.config.max_frames.is_some_and(|max| *sent >= max) {
                return Ok(SessionEnd::FrameLimit);
            }
            let started = Instant::now();
            let frame = generator.frame(self.config.packing_mode, frame_size);
            match self.write_frame(&mut stream, &frame) {
                Ok(true) => *sent += 1,
                Ok(false) => return Ok(SessionEnd::Stopped),
                Err(e) if is_disconnect(&e) => return Ok(SessionEnd::ClientGone),
                Err(e) => return Err(ScopeError::Io(e)),
            }
            if let Some(period) = period {
                let elapsed = started.elapsed();
                if elapsed < period && self.stop.wait_timeout(period - elapsed) {
                    return Ok(SessionEnd::Stopped);
                }
            }
        }
    }

    /// Read until `token` has arrived. `false` if stopped or the client left.
    fn await_token(&self, stream: &mut TcpStream, token: &[u8]) -> Result<bool> {
        let mut got = Vec::with_capacity(token.len());
        let mut buf = [0u8; 64];
        while got.len() < token.len() {
            if self.stop.is_triggered() {
                return Ok(false);
            }
            match stream.read(&mut buf) {
                Ok(0) => return Ok(false),
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(e) if is_timeout(&e) => {}
                Err(e) => return Err(ScopeError::Io(e)),
            }
        }
        if !got.starts_with(token) {
            warn!("unexpected handshake, streaming anyway");
        }
        Ok(true)
    }

    /// Write the whole frame, re-checking the stop signal while the client's
    /// receive window is full. `Ok(false)` if stopped mid-frame.
    fn write_frame(&self, stream: &mut TcpStream, frame: &[u8]) -> std::io::Result<bool> {
        let mut written = 0;
        while written < frame.len() {
            if self.stop.is_triggered() {
                return Ok(false);
            }
            match stream.write(&frame[written..]) {
                Ok(0) => return Err(std::io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if is_timeout(&e) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::WriteZero
    )
}

/// A running emulator thread.
pub struct EmulatorHandle {
    addr: SocketAddr,
    stop: StopSignal,
    thread: Option<JoinHandle<Result<u64>>>,
}

impl EmulatorHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop serving and return the total frames written.
    pub fn shutdown(mut self) -> Result<u64> {
        self.stop.trigger();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| ScopeError::StageFailed("emulator thread panicked".into()))?,
            None => Ok(0),
        }
    }
}

impl Drop for EmulatorHandle {
    fn drop(&mut self) {
        self.stop.trigger();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
