//! Frame sources: own the socket and turn a byte stream into [`RawFrame`]s.
//!
//! The `FrameSource` trait is the seam between the transport and the rest of
//! the pipeline. Tests and tools can plug in any implementor; the controller
//! builds one with [`connect`].
//!
//! Sockets are opened with a read timeout. A timeout is not an error: it is
//! the point where the source checks the stop signal, which is how a blocked
//! read is cancelled without sharing the socket with another thread.

pub mod tcp;
pub mod udp;

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    buffering::RawFrame,
    engine::signal::StopSignal,
    error::{Result, ScopeError},
};

pub use tcp::TcpFrameSource;
pub use udp::UdpFrameSource;

/// Largest UDP payload that fits in one IPv4 datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Socket type used to reach the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Byte stream; frames are cut at a fixed size.
    Tcp,
    /// One datagram per frame, size passed through.
    Udp,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
            Transport::Udp => f.write_str("udp"),
        }
    }
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

/// Connection parameters shared by both transports.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Bytes per TCP frame. Ignored for UDP, where the datagram is the frame.
    pub frame_size: usize,
    /// Sent once right after connecting, if set.
    pub handshake_token: Option<String>,
    /// Socket read timeout; also the stop-signal polling interval.
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    /// Warn once when no data has arrived for this long.
    pub stall_warning: Duration,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            frame_size: 3072,
            handshake_token: None,
            read_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(5),
            stall_warning: Duration::from_secs(5),
        }
    }
}

/// Producer of raw frames for the read stage.
pub trait FrameSource: Send + 'static {
    /// Block until the next frame is available.
    ///
    /// Returns `Ok(None)` at end of stream: the peer closed the connection or
    /// the stop signal was observed.
    ///
    /// # Errors
    /// `ScopeError::Io` on any socket failure. The source is unusable after.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;

    fn transport(&self) -> Transport;

    fn peer_addr(&self) -> SocketAddr;
}

/// Open a source of the given transport to `addr` (`host:port`).
///
/// # Errors
/// `ScopeError::Connect` if the address cannot be resolved or reached.
pub fn connect(
    addr: &str,
    transport: Transport,
    options: SourceOptions,
    stop: StopSignal,
) -> Result<Box<dyn FrameSource>> {
    Ok(match transport {
        Transport::Tcp => Box::new(TcpFrameSource::connect(addr, options, stop)?),
        Transport::Udp => Box::new(UdpFrameSource::connect(addr, options, stop)?),
    })
}

pub(crate) fn resolve(addr: &str) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|source| ScopeError::Connect {
            addr: addr.to_string(),
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(ScopeError::Connect {
            addr: addr.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved"),
        });
    }
    Ok(addrs)
}

pub(crate) fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
    )
}

/// Tracks time since the last received byte and warns once per stall.
pub(crate) struct StallTracker {
    threshold: Duration,
    last_data: Instant,
    warned: bool,
}

impl StallTracker {
    pub(crate) fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_data: Instant::now(),
            warned: false,
        }
    }

    pub(crate) fn data(&mut self) {
        if self.warned {
            tracing::info!("data flow resumed");
        }
        self.last_data = Instant::now();
        self.warned = false;
    }

    pub(crate) fn idle(&mut self, peer: SocketAddr) {
        let idle = self.last_data.elapsed();
        if !self.warned && idle >= self.threshold {
            warn!(peer = %peer, idle_ms = idle.as_millis() as u64, "no data from instrument");
            self.warned = true;
        }
    }
}
