//! slips-render: drive the Slips sequencer offline and print what it plays
//!
//! - `render`: clock Slips for a number of steps and print one row per step
//! - `schema`: print the params JSON schema of every module
//! - `scales`: list the builtin scales
//! - `ranges`: list the voltage range presets
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use serde_json::{Value, json};
use slips_core::dsp::schema;
use slips_core::dsp::seq::slipspander::NOTE_NAMES;
use slips_core::{BuiltinScale, PolySignal, Rack, RangeMapper};
use tracing_subscriber::EnvFilter;

use slips_cli::setup::{PatchFile, SLIPS_SLOT, SquareClock, read_rack_state, write_rack_state};

/// Offline renderer for the Slips sequencer
#[derive(Parser)]
#[command(name = "slips-render")]
#[command(about = "Render Slips sequences offline")]
#[command(version)]
struct Cli {
    /// Output format
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Clock the sequencer and print one row per step
    Render {
        /// Patch file with sample rate, clock rate, seed, params and scale
        #[arg(short, long)]
        patch: Option<PathBuf>,

        /// Number of clock pulses to render
        #[arg(short = 'n', long, default_value_t = 32)]
        clocks: u64,

        /// Sample rate in Hz (overrides the patch file)
        #[arg(short, long)]
        sample_rate: Option<f32>,

        /// Clock rate in Hz (overrides the patch file)
        #[arg(long)]
        clock_hz: Option<f32>,

        /// Random seed (overrides the patch file)
        #[arg(long)]
        seed: Option<u64>,

        /// Slips params as inline JSON, merged over the patch file's
        #[arg(long)]
        params: Option<String>,

        /// Builtin scale name (e.g. "dorian"), or custom notes for a
        /// Slipspander (e.g. "0,3,7,10")
        #[arg(long)]
        scale: Option<String>,

        /// Sequence voltage range, e.g. "-2..2"
        #[arg(long, allow_hyphen_values = true)]
        seq_range: Option<RangeMapper>,

        /// Modulation voltage range, e.g. "0..5"
        #[arg(long, allow_hyphen_values = true)]
        mod_range: Option<RangeMapper>,

        /// Slip voltage range, e.g. "-1..1"
        #[arg(long, allow_hyphen_values = true)]
        slip_range: Option<RangeMapper>,

        /// Start from a saved rack instead of a fresh one
        #[arg(long)]
        load: Option<PathBuf>,

        /// Save the rack after rendering
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Print the params schema of every module as JSON
    Schema,

    /// List the builtin scales
    Scales,

    /// List the voltage range presets
    Ranges,
}

/// One rendered clock pulse.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StepRow {
    clock: u64,
    step: u64,
    /// Lane written by this step
    lane: usize,
    seq: Vec<f32>,
    gate: f32,
    slip_gate: f32,
    eoc: bool,
    #[serde(rename = "mod")]
    mod_value: f32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            patch,
            clocks,
            sample_rate,
            clock_hz,
            seed,
            params,
            scale,
            seq_range,
            mod_range,
            slip_range,
            load,
            save,
        } => {
            let mut setup = match &patch {
                Some(path) => PatchFile::read(path)?,
                None => PatchFile::default(),
            };
            if let Some(sample_rate) = sample_rate {
                setup.sample_rate = sample_rate;
            }
            if let Some(clock_hz) = clock_hz {
                setup.clock_hz = clock_hz;
            }
            if seed.is_some() {
                setup.seed = seed;
            }
            let mut overrides: Value = match params {
                Some(text) => serde_json::from_str(&text).context("--params is not valid JSON")?,
                None => json!({}),
            };
            let Some(fields) = overrides.as_object_mut() else {
                bail!("--params must be a JSON object");
            };
            if let Some(scale) = scale {
                setup.apply_scale(&scale, fields)?;
            }
            for (key, range) in [
                ("seqRange", seq_range),
                ("modRange", mod_range),
                ("slipRange", slip_range),
            ] {
                if let Some(range) = range {
                    fields.insert(key.into(), serde_json::to_value(range)?);
                }
            }

            cmd_render(&setup, overrides, clocks, load, save, cli.format)
        }
        Commands::Schema => cmd_schema(),
        Commands::Scales => {
            cmd_scales(cli.format);
            Ok(())
        }
        Commands::Ranges => {
            cmd_ranges(cli.format);
            Ok(())
        }
    }
}

fn build_rack(setup: &PatchFile, overrides: Value, load: Option<PathBuf>) -> Result<Rack> {
    let mut rack = match load {
        Some(path) => {
            setup.validate()?;
            let state = read_rack_state(&path)?;
            tracing::info!(path = %path.display(), slots = state.slots.len(), "loaded rack");
            Rack::load(setup.sample_rate, &state).context("failed to restore rack")?
        }
        None => setup.build_rack()?,
    };
    if overrides.as_object().is_some_and(|fields| !fields.is_empty()) {
        rack.update_params(SLIPS_SLOT, overrides)
            .context("invalid params override")?;
    }
    Ok(rack)
}

/// Cursor position and active lane, read from the saved sequencer state.
fn cursor(rack: &Rack) -> (u64, usize) {
    let Some(state) = rack.module(SLIPS_SLOT).map(|m| m.get_state()) else {
        return (0, 0);
    };
    let step = state["state"]["currentStep"].as_u64().unwrap_or_default();
    let lane = state["state"]["currChannel"].as_u64().unwrap_or_default() as usize;
    (step, lane)
}

fn cmd_render(
    setup: &PatchFile,
    overrides: Value,
    clocks: u64,
    load: Option<PathBuf>,
    save: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let mut rack = build_rack(setup, overrides, load)?;
    let mut clock = SquareClock::new(setup.sample_rate, setup.clock_hz);

    tracing::info!(
        sample_rate = setup.sample_rate,
        clock_hz = setup.clock_hz,
        samples_per_clock = clock.samples_per_cycle(),
        clocks,
        "rendering"
    );

    // settle the trigger inputs on a low clock
    rack.set_input(SLIPS_SLOT, "clock", PolySignal::mono(0.0))?;
    rack.tick();

    if format == OutputFormat::Table {
        println!(
            "{:>6} {:>5} {:>10} {:>6} {:>8} {:>6} {:>5}  {}",
            "CLOCK", "STEP", "SEQ", "NOTE", "MOD", "GATE", "EOC", "LANES"
        );
        println!("{}", "-".repeat(72));
    }

    let mut eoc_count = 0;
    let mut rows = 0;
    while rows < clocks {
        let (voltage, rising) = clock.sample();
        rack.set_input(SLIPS_SLOT, "clock", PolySignal::mono(voltage))?;
        rack.tick();
        if !rising {
            continue;
        }

        let seq = rack.output(SLIPS_SLOT, "seq")?;
        let (step, lane) = cursor(&rack);
        let row = StepRow {
            clock: rows,
            step,
            lane,
            seq: seq.as_slice().to_vec(),
            gate: rack.output(SLIPS_SLOT, "gate")?.as_slice().iter().sum(),
            slip_gate: rack.output(SLIPS_SLOT, "slipGate")?.get(0),
            eoc: rack.output(SLIPS_SLOT, "eoc")?.get(0) > 0.0,
            mod_value: rack.output(SLIPS_SLOT, "mod")?.get(0),
        };
        if row.eoc {
            eoc_count += 1;
        }
        match format {
            OutputFormat::Table => print_row_table(&row),
            OutputFormat::Json => print_row_json(&row),
        }
        rows += 1;
    }

    if format == OutputFormat::Table {
        println!("{}", "-".repeat(72));
        println!("Rendered {} clocks, {} cycles completed", rows, eoc_count);
    }

    if let Some(path) = save {
        write_rack_state(&path, &rack.save())?;
        tracing::info!(path = %path.display(), "saved rack");
    }
    Ok(())
}

/// Note name for a V/Oct pitch with 0V = C4.
fn note_name(volts: f32) -> String {
    let semitones = (volts * 12.0).round() as i32;
    let name = NOTE_NAMES[semitones.rem_euclid(12) as usize];
    format!("{}{}", name, 4 + semitones.div_euclid(12))
}

fn print_row_table(row: &StepRow) {
    let lane_pitch = row.seq.get(row.lane).copied().unwrap_or_default();

    let step = (row.step + 1).to_string().cyan();
    let seq = format!("{:+.4}", lane_pitch).yellow();
    let note = note_name(lane_pitch).white();
    let modulation = format!("{:+.3}", row.mod_value).blue();
    let gate = if row.gate > 0.0 {
        "on".green()
    } else {
        "skip".dimmed()
    };
    let eoc = if row.eoc { "eoc".magenta() } else { "".normal() };
    let slip = if row.slip_gate > 0.0 {
        " slip".red()
    } else {
        "".normal()
    };
    let lanes = if row.seq.len() > 1 {
        row.seq
            .iter()
            .map(|v| format!("{:+.2}", v))
            .collect::<Vec<_>>()
            .join(" ")
            .dimmed()
    } else {
        "".normal()
    };

    println!(
        "{:>6} {:>5} {:>10} {:>6} {:>8} {:>6} {:>5}  {}{}",
        row.clock, step, seq, note, modulation, gate, eoc, lanes, slip
    );
}

fn print_row_json(row: &StepRow) {
    if let Ok(json) = serde_json::to_string(row) {
        println!("{}", json);
    }
}

fn cmd_schema() -> Result<()> {
    let schemas = schema();
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}

fn cmd_scales(format: OutputFormat) {
    for (index, scale) in BuiltinScale::ALL.iter().enumerate() {
        match format {
            OutputFormat::Table => {
                let notes = scale
                    .intervals()
                    .iter()
                    .map(|n| NOTE_NAMES[*n as usize])
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("{:>3}  {:18} {}", index, scale.name().cyan(), notes);
            }
            OutputFormat::Json => {
                let line = json!({
                    "index": index,
                    "name": scale.name(),
                    "intervals": scale.intervals(),
                });
                println!("{}", line);
            }
        }
    }
}

fn cmd_ranges(format: OutputFormat) {
    for (a, b) in RangeMapper::PRESETS {
        let range = RangeMapper::new(a, b);
        match format {
            OutputFormat::Table => println!(
                "{:>8}  low {:+5.1}  span {:4.1}",
                range.to_string().cyan(),
                range.low(),
                range.span()
            ),
            OutputFormat::Json => println!("{}", json!({ "label": range.to_string(), "a": a, "b": b })),
        }
    }
}
