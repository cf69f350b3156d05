//! slips-bench: Benchmark harness for profiling the Slips engine
//!
//! This binary runs the rack without any audio backend so native profilers
//! (samply, Instruments, perf) or Tracy can look at the per-sample path.
//!
//! Usage:
//!   slips-bench run --patch patches/dense.json --frames 4800000
//!   slips-bench sweep
//!   samply record ./target/profiling/slips-bench run

use std::hint::black_box;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use slips_cli::setup::{DEFAULT_SAMPLE_RATE, PatchFile, SLIPS_SLOT, SquareClock};
use slips_core::{PORT_MAX_CHANNELS, PolySignal, Rack};

const DEFAULT_FRAMES: u64 = 48000 * 10; // 10 seconds at 48kHz

/// Benchmark harness for the Slips engine
#[derive(Parser)]
#[command(name = "slips-bench")]
#[command(about = "Profile and benchmark the Slips sequencer engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a benchmark with a patch file (or the default patch)
    Run {
        /// Path to a patch JSON file
        #[arg(short, long)]
        patch: Option<PathBuf>,

        /// Number of audio frames to process
        #[arg(short, long, default_value_t = DEFAULT_FRAMES)]
        frames: u64,

        /// Sample rate in Hz (overrides the patch file)
        #[arg(short, long)]
        sample_rate: Option<f32>,

        /// Warmup frames before measurement
        #[arg(short, long, default_value_t = 48000)]
        warmup: u64,
    },

    /// Time every polyphonic channel count from 1 to 16
    Sweep {
        /// Frames per channel count
        #[arg(short, long, default_value_t = 48000)]
        frames: u64,
    },
}

fn main() -> Result<()> {
    // Initialize Tracy if profile feature is enabled
    #[cfg(feature = "profile")]
    {
        use tracing_subscriber::prelude::*;
        let tracy_layer = tracing_tracy::TracyLayer::default();
        tracing_subscriber::registry().with(tracy_layer).init();
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            patch,
            frames,
            sample_rate,
            warmup,
        } => {
            let mut setup = match &patch {
                Some(path) => PatchFile::read(path)?,
                None => dense_patch(0),
            };
            if let Some(sample_rate) = sample_rate {
                setup.sample_rate = sample_rate;
            }
            run_benchmark(&setup, frames, warmup)
        }
        Commands::Sweep { frames } => sweep(frames),
    }
}

/// A busy default patch: fast clock, skips, slips and a custom scale.
fn dense_patch(channels: usize) -> PatchFile {
    PatchFile {
        sample_rate: DEFAULT_SAMPLE_RATE,
        clock_hz: 50.0,
        seed: Some(1),
        slips: json!({
            "steps": 13,
            "prob": 0.7,
            "slipAmount": 0.3,
            "channels": channels,
            "polyMod": true,
            "modQuantize": true,
            "modAddSlips": true,
        }),
        scale: Some(vec![0, 2, 3, 7, 9]),
    }
}

/// Process `frames` samples with the clock driving Slips.
#[inline(always)]
fn process_frames(rack: &mut Rack, clock: &mut SquareClock, frames: u64) -> Result<()> {
    for _ in 0..frames {
        #[cfg(feature = "profile")]
        let _span = tracing::info_span!("process_frame").entered();

        let (voltage, _) = clock.sample();
        rack.set_input(SLIPS_SLOT, "clock", PolySignal::mono(voltage))?;
        rack.tick();
        black_box(rack.output(SLIPS_SLOT, "seq")?);
    }
    Ok(())
}

fn time_frames(setup: &PatchFile, frames: u64, warmup: u64) -> Result<Duration> {
    let mut rack = setup.build_rack()?;
    let mut clock = SquareClock::new(setup.sample_rate, setup.clock_hz);
    process_frames(&mut rack, &mut clock, warmup)?;

    let start = Instant::now();
    process_frames(&mut rack, &mut clock, frames)?;
    Ok(start.elapsed())
}

fn run_benchmark(setup: &PatchFile, frames: u64, warmup: u64) -> Result<()> {
    println!(
        "Running benchmark: {} frames ({:.2}s at {}Hz), clock {}Hz",
        frames,
        frames as f64 / setup.sample_rate as f64,
        setup.sample_rate,
        setup.clock_hz
    );
    println!("  Warmup: {} frames", warmup);

    let elapsed = time_frames(setup, frames, warmup)?;

    // Results
    let total_ns = elapsed.as_nanos() as f64;
    let ns_per_frame = total_ns / frames.max(1) as f64;
    let frames_per_sec = 1_000_000_000.0 / ns_per_frame;
    let realtime_budget_ns = 1_000_000_000.0 / setup.sample_rate as f64;
    let budget_usage = (ns_per_frame / realtime_budget_ns) * 100.0;

    println!("\nResults:");
    println!("  Total time:     {:?}", elapsed);
    println!("  Frames:         {}", frames);
    println!("  ns/frame:       {:.2}", ns_per_frame);
    println!("  frames/sec:     {:.0}", frames_per_sec);
    println!(
        "  Real-time budget: {:.2} ns/frame @ {}Hz",
        realtime_budget_ns, setup.sample_rate
    );
    println!("  Budget usage:   {:.4}%", budget_usage);

    if budget_usage > 100.0 {
        println!("\n  WARNING: Exceeds real-time budget!");
    } else {
        println!(
            "\n  Within real-time budget ({:.1}x headroom)",
            100.0 / budget_usage
        );
    }
    Ok(())
}

fn sweep(frames: u64) -> Result<()> {
    println!("{:>8} {:>12}", "LANES", "ns/frame");
    println!("{:-<8} {:-<12}", "", "");
    for channels in 0..PORT_MAX_CHANNELS {
        let setup = dense_patch(channels);
        let elapsed = time_frames(&setup, frames, frames / 10)?;
        let ns_per_frame = elapsed.as_nanos() as f64 / frames.max(1) as f64;
        println!("{:>8} {:>12.2}", channels + 1, ns_per_frame);
    }
    Ok(())
}
