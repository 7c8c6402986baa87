//! Persistent pipeline configuration (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use scopewire_core::{PipelineConfig, Transport};

use crate::cli::CaptureArgs;

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Scopewire")
            .join("config.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("scopewire")
            .join("config.json")
    }
}

/// Read the config file. A missing file yields the defaults; a malformed one
/// is an error rather than a silent reset.
pub fn load_config(path: &Path) -> anyhow::Result<PipelineConfig> {
    let mut config = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<PipelineConfig>(&raw)
            .with_context(|| format!("parsing {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PipelineConfig::default(),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    config.normalize();
    Ok(config)
}

pub fn save_config(path: &Path, config: &PipelineConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

/// Command-line flags win over file values.
pub fn apply_overrides(config: &mut PipelineConfig, args: &CaptureArgs) {
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.udp {
        config.transport = Transport::Udp;
    }
    if let Some(frame_size) = args.frame_size {
        config.frame_size = frame_size;
    }
    if let Some(mode) = args.mode {
        config.packing_mode = mode;
    }
    if let Some(capacity) = args.capacity {
        config.relay_capacity = capacity;
    }
    if let Some(interval) = args.report_interval {
        config.report_interval_secs = interval;
    }
    if let Some(token) = &args.handshake {
        config.handshake_token = Some(token.clone());
    }
    config.normalize();
}
