fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use scopewire_core::buffering::RawFrame;
    use scopewire_core::codec::{self, PackingMode};
    use scopewire_core::emulator::{SignalGenerator, Waveform};
    use serde::Serialize;
    use std::path::PathBuf;
    use std::time::Instant;

    #[derive(Debug)]
    struct Args {
        frame_size: usize,
        frames: usize,
        iterations: usize,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct ModeResult {
        mode: String,
        frame_size: usize,
        frames: usize,
        samples_per_frame: usize,
        p50_frame_us: f64,
        p95_frame_us: f64,
        avg_frame_us: f64,
        mib_per_sec: f64,
        msamples_per_sec: f64,
    }

    #[derive(Debug, Clone, Serialize)]
    struct Summary {
        iterations: usize,
        modes: Vec<ModeResult>,
    }

    fn parse_args() -> Result<Args, String> {
        let mut frame_size: usize = 3072;
        let mut frames: usize = 2000;
        let mut iterations: usize = 3;
        let mut output: Option<PathBuf> = None;

        let mut it = std::env::args().skip(1).peekable();
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--frame-size" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --frame-size".into());
                    };
                    frame_size = v
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --frame-size".to_string())?
                        .clamp(3, 16 * 1024 * 1024);
                }
                "--frames" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --frames".into());
                    };
                    frames = v
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --frames".to_string())?
                        .max(1);
                }
                "--iterations" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --iterations".into());
                    };
                    iterations = v
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --iterations".to_string())?
                        .clamp(1, 10);
                }
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    output = Some(PathBuf::from(v));
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p scopewire-core --release --bin benchmark -- \\
  [--frame-size <bytes>] [--frames <n>] [--iterations <n>] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other => {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }

        Ok(Args {
            frame_size,
            frames,
            iterations,
            output,
        })
    }

    let args = parse_args()?;
    println!(
        "Running codec benchmark: frame_size={} frames={} iterations={}",
        args.frame_size, args.frames, args.iterations
    );

    let mut modes = Vec::new();
    for mode in [PackingMode::Raw16, PackingMode::Packed12] {
        let mut generator = SignalGenerator::new(Waveform::Triangle, 256);
        let frames: Vec<RawFrame> = (0..args.frames)
            .map(|seq| RawFrame::new(seq as u64, generator.frame(mode, args.frame_size)))
            .collect();

        let mut per_frame_us = Vec::with_capacity(args.frames * args.iterations);
        let mut checksum = 0u64;
        let started = Instant::now();
        for _ in 0..args.iterations {
            for frame in &frames {
                let t = Instant::now();
                let block = codec::decode(frame, mode);
                per_frame_us.push(t.elapsed().as_secs_f64() * 1e6);
                checksum = checksum.wrapping_add(u64::from(block.samples[0]));
            }
        }
        let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);

        let total_frames = (args.frames * args.iterations) as f64;
        let samples_per_frame = mode.samples_in(args.frame_size);
        let result = ModeResult {
            mode: mode.to_string(),
            frame_size: args.frame_size,
            frames: args.frames * args.iterations,
            samples_per_frame,
            p50_frame_us: percentile(&per_frame_us, 0.50),
            p95_frame_us: percentile(&per_frame_us, 0.95),
            avg_frame_us: per_frame_us.iter().sum::<f64>() / per_frame_us.len() as f64,
            mib_per_sec: total_frames * args.frame_size as f64 / elapsed / (1024.0 * 1024.0),
            msamples_per_sec: total_frames * samples_per_frame as f64 / elapsed / 1e6,
        };
        println!(
            "{mode}: p50={:.2}us p95={:.2}us {:.1} MiB/s (checksum {checksum})",
            result.p50_frame_us, result.p95_frame_us, result.mib_per_sec
        );
        modes.push(result);
    }

    let summary = Summary {
        iterations: args.iterations,
        modes,
    };

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}

/// Nearest-rank percentile: the smallest value with at least `p` of the
/// samples at or below it.
fn percentile(values: &[f64], p: f64) -> f64 {
    let Some(last) = values.len().checked_sub(1) else {
        return 0.0;
    };
    let rank = (p.clamp(0.0, 1.0) * values.len() as f64).ceil() as usize;
    let mut scratch = values.to_vec();
    let (_, value, _) =
        scratch.select_nth_unstable_by(rank.saturating_sub(1).min(last), f64::total_cmp);
    *value
}

#[cfg(test)]
mod tests {
    use super::percentile;

    #[test]
    fn percentile_uses_nearest_rank() {
        let values = [5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 0.50), 3.0);
        assert_eq!(percentile(&values, 0.95), 5.0);
        assert_eq!(percentile(&values, 2.0), 5.0);
    }

    #[test]
    fn percentile_of_nothing_is_zero() {
        assert_eq!(percentile(&[], 0.5), 0.0);
        assert_eq!(percentile(&[7.5], 0.95), 7.5);
    }
}
