use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use scopewire_core::{emulator::Waveform, PackingMode};

#[derive(Debug, Parser)]
#[command(name = "scopewire", version, about = "Stream samples from a networked ADC instrument")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to an instrument and stream samples until Ctrl-C.
    Capture(CaptureArgs),
    /// Serve a synthetic waveform the way the instrument does.
    Emulate(EmulateArgs),
}

#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// JSON config file. Defaults to the per-user config path.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    /// Use UDP datagrams instead of a TCP stream.
    #[arg(long)]
    pub udp: bool,
    /// Bytes per TCP frame.
    #[arg(long)]
    pub frame_size: Option<usize>,
    /// raw16 or packed12.
    #[arg(long)]
    pub mode: Option<PackingMode>,
    /// Slots per inter-stage relay.
    #[arg(long)]
    pub capacity: Option<usize>,
    /// Seconds per throughput window.
    #[arg(long)]
    pub report_interval: Option<f64>,
    /// Token sent once after connecting.
    #[arg(long)]
    pub handshake: Option<String>,
    /// Write every sample to this CSV file.
    #[arg(long)]
    pub csv: Option<PathBuf>,
    /// Stop after this many sample blocks.
    #[arg(long)]
    pub max_frames: Option<u64>,
    /// Keep a rolling window of this many samples and report it at the end.
    #[arg(long)]
    pub window: Option<usize>,
    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    pub print_config: bool,
    /// Write the effective configuration to this file before capturing.
    #[arg(long)]
    pub save_config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct EmulateArgs {
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(long, default_value = "packed12")]
    pub mode: PackingMode,
    #[arg(long, default_value_t = 3072)]
    pub frame_size: usize,
    /// Frames per second; 0 streams as fast as the client reads.
    #[arg(long, default_value_t = 100.0)]
    pub rate_hz: f64,
    /// square, triangle or sawtooth.
    #[arg(long, default_value = "square")]
    pub waveform: Waveform,
    #[arg(long, default_value_t = 64)]
    pub period: usize,
    /// Wait for this token before streaming to a client.
    #[arg(long)]
    pub handshake: Option<String>,
    /// Close each client after this many frames.
    #[arg(long)]
    pub max_frames: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn emulate_defaults_match_instrument() {
        let cli = Cli::try_parse_from(["scopewire", "emulate"]).unwrap();
        let Command::Emulate(args) = cli.command else {
            panic!("expected emulate");
        };
        assert_eq!(args.port, 8080);
        assert_eq!(args.mode, PackingMode::Packed12);
        assert_eq!(args.waveform, Waveform::Square);
    }

    #[test]
    fn capture_window_and_limit_parse() {
        let cli =
            Cli::try_parse_from(["scopewire", "capture", "--window", "2048", "--max-frames", "10"])
                .unwrap();
        let Command::Capture(args) = cli.command else {
            panic!("expected capture");
        };
        assert_eq!(args.window, Some(2048));
        assert_eq!(args.max_frames, Some(10));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["scopewire", "capture", "--mode", "24bit"]).is_err());
    }
}
