//! Shared setup for the CLI binaries: patch files, rack construction and
//! the square-wave clock that drives Slips offline.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use slips_core::{BuiltinScale, CustomScale, Rack, RackState, Slips, Slipspander};

pub const DEFAULT_SAMPLE_RATE: f32 = 48000.0;
pub const DEFAULT_CLOCK_HZ: f32 = 8.0;

pub const SLIPS_SLOT: usize = 0;
pub const EXPANDER_SLOT: usize = 1;

/// A render setup read from JSON.
///
/// ```json
/// { "sampleRate": 48000, "clockHz": 4, "seed": 7,
///   "slips": { "steps": 8, "slipAmount": 0.25 }, "scale": [0, 3, 7] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PatchFile {
    pub sample_rate: f32,
    pub clock_hz: f32,
    pub seed: Option<u64>,
    /// Params document for Slips
    pub slips: Value,
    /// Notes for a Slipspander placed to the right of Slips
    pub scale: Option<Vec<u8>>,
}

impl Default for PatchFile {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            clock_hz: DEFAULT_CLOCK_HZ,
            seed: None,
            slips: json!({}),
            scale: None,
        }
    }
}

impl PatchFile {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read patch file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse patch file {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate > 0.0) {
            bail!("sample rate must be positive, got {}", self.sample_rate);
        }
        if !(self.clock_hz > 0.0) || self.clock_hz * 2.0 > self.sample_rate {
            bail!(
                "clock rate {} Hz does not fit at {} Hz",
                self.clock_hz,
                self.sample_rate
            );
        }
        Ok(())
    }

    /// A builtin scale name selects Slips' own scale through `overrides`;
    /// anything else is read as custom notes for a Slipspander.
    pub fn apply_scale(&mut self, scale: &str, overrides: &mut Map<String, Value>) -> Result<()> {
        if let Ok(builtin) = BuiltinScale::parse(scale) {
            overrides.insert("scale".into(), json!(builtin.name()));
            return Ok(());
        }
        let custom =
            CustomScale::parse(scale).with_context(|| format!("invalid scale '{scale}'"))?;
        self.scale = Some(custom.notes().to_vec());
        Ok(())
    }

    /// Build a rack with Slips in slot 0 and, when a scale is given, a
    /// Slipspander in slot 1.
    pub fn build_rack(&self) -> Result<Rack> {
        self.validate()?;
        let mut rack = Rack::new(self.sample_rate, 2);

        let slips = match self.seed {
            Some(seed) => Slips::with_seed(seed),
            None => Slips::new(),
        };
        rack.insert(SLIPS_SLOT, Box::new(slips))?;
        rack.update_params(SLIPS_SLOT, self.slips.clone())
            .context("invalid slips params")?;

        if let Some(notes) = &self.scale {
            let scale = CustomScale::new(notes).context("invalid custom scale")?;
            let mut expander = Slipspander::new();
            for &note in scale.notes() {
                expander.set_note(note as usize, true);
            }
            rack.insert(EXPANDER_SLOT, Box::new(expander))?;
        }
        Ok(rack)
    }
}

pub fn read_rack_state(path: &Path) -> Result<RackState> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read rack state {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse rack state {}", path.display()))
}

pub fn write_rack_state(path: &Path, state: &RackState) -> Result<()> {
    let text = serde_json::to_string_pretty(state)?;
    fs::write(path, text).with_context(|| format!("failed to write rack state {}", path.display()))
}

/// 50% duty square wave, 0V/10V.
#[derive(Debug, Clone, Copy)]
pub struct SquareClock {
    samples_per_cycle: u64,
    position: u64,
}

impl SquareClock {
    pub fn new(sample_rate: f32, clock_hz: f32) -> Self {
        let samples_per_cycle = ((sample_rate / clock_hz).round() as u64).max(2);
        Self {
            samples_per_cycle,
            position: 0,
        }
    }

    pub fn samples_per_cycle(&self) -> u64 {
        self.samples_per_cycle
    }

    /// Voltage for the next sample and whether it is the rising edge.
    pub fn sample(&mut self) -> (f32, bool) {
        let rising = self.position == 0;
        let high = self.position < self.samples_per_cycle / 2;
        self.position = (self.position + 1) % self.samples_per_cycle;
        (if high { 10.0 } else { 0.0 }, rising)
    }
}
