//! Scopewire command-line host.
//!
//! `scopewire capture` streams from an instrument (or emulator) until Ctrl-C
//! and prints final diagnostics as JSON. `scopewire emulate` serves a
//! synthetic waveform for bench testing without hardware.

mod cli;
mod commands;
mod config;

use clap::Parser;
use tracing::info;

use cli::{Cli, Command};

fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("scopewire=info,scopewire_core=info")
            }),
        )
        .init();

    let cli = Cli::parse();
    info!("Scopewire starting");

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    }) {
        tracing::warn!("could not install Ctrl-C handler: {e}");
    }

    let result = match cli.command {
        Command::Capture(args) => commands::capture(args, interrupt_rx),
        Command::Emulate(args) => commands::emulate(args, interrupt_rx),
    };

    if let Err(e) = result {
        eprintln!("scopewire: {e:#}");
        std::process::exit(1);
    }
}
