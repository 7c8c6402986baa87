use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    buffering::DEFAULT_RELAY_CAPACITY,
    codec::PackingMode,
    error::{Result, ScopeError},
    source::{SourceOptions, Transport, MAX_DATAGRAM_SIZE},
};

/// Largest accepted TCP frame (16 MiB).
const MAX_TCP_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Configuration consumed by `PipelineController::start`.
///
/// Loaded from JSON with camelCase keys; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PipelineConfig {
    /// Instrument host name or address. Default: the instrument's
    /// access-point address `192.168.4.1`.
    pub host: String,
    /// Default: 8080.
    pub port: u16,
    pub transport: Transport,
    /// Bytes per TCP frame. Default: 3072.
    pub frame_size: usize,
    pub packing_mode: PackingMode,
    /// Slots per inter-stage relay. Default: 16.
    pub relay_capacity: usize,
    /// Seconds per throughput window. Default: 1.0.
    pub report_interval_secs: f64,
    /// Sent once after connecting. Default: none.
    pub handshake_token: Option<String>,
    /// Socket read timeout, which bounds how long a stop takes to be noticed.
    /// Default: 200 ms.
    pub read_timeout_ms: u64,
    /// Default: 5000 ms.
    pub connect_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            host: "192.168.4.1".into(),
            port: 8080,
            transport: Transport::Tcp,
            frame_size: 3072,
            packing_mode: PackingMode::Packed12,
            relay_capacity: DEFAULT_RELAY_CAPACITY,
            report_interval_secs: 1.0,
            handshake_token: None,
            read_timeout_ms: 200,
            connect_timeout_ms: 5000,
        }
    }
}

impl PipelineConfig {
    /// Clamp every field into its legal range.
    pub fn normalize(&mut self) {
        self.host = self.host.trim().to_string();
        let max_frame = match self.transport {
            Transport::Tcp => MAX_TCP_FRAME_SIZE,
            Transport::Udp => MAX_DATAGRAM_SIZE,
        };
        self.frame_size = self.frame_size.clamp(1, max_frame);
        self.relay_capacity = self.relay_capacity.clamp(1, 1024);
        if !self.report_interval_secs.is_finite() {
            self.report_interval_secs = 1.0;
        }
        self.report_interval_secs = self.report_interval_secs.clamp(0.1, 60.0);
        self.read_timeout_ms = self.read_timeout_ms.clamp(10, 5_000);
        self.connect_timeout_ms = self.connect_timeout_ms.clamp(100, 60_000);
        self.handshake_token = self.handshake_token.take().filter(|t| !t.is_empty());
    }

    /// Reject configurations that cannot be normalized into something usable.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ScopeError::InvalidConfig("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ScopeError::InvalidConfig("port must not be 0".into()));
        }
        Ok(())
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs_f64(self.report_interval_secs)
    }

    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            frame_size: self.frame_size,
            handshake_token: self.handshake_token.clone(),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            ..SourceOptions::default()
        }
    }
}
