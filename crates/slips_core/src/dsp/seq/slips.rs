//! Slips - a 64-step random sequencer with probabilistic skips and slips.
//!
//! Three 64-slot tracks drive the outputs:
//! - the main sequence, quantized to a scale
//! - a modulation sequence, optionally quantized
//! - slip offsets, re-rolled once per cycle and added on top of the sequence
//!
//! Every clock edge advances the cursor. A step may be skipped with
//! probability `1 - prob`, in which case the active lane replays the last
//! played pitch for the whole step with its gate low. When a Slipspander sits to the right, its
//! selected notes replace the builtin scale.
//!
//! # Inputs
//! `clock`, `reset`, `root`, `scale`, `steps`, `start`, `prob`, `slips`,
//! `genSeq`, `genMod`. CV inputs are clamped to 0..10V and replace their
//! knob while patched.
//!
//! # Outputs
//! `seq`, `gate`, `slipGate`, `eoc`, `mod`

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::dsp::utils::{PulseGenerator, SchmittTrigger, cv_to_range};
use crate::error::{ModuleError, Result};
use crate::poly::{PORT_MAX_CHANNELS, PolyOutput, PolySignal};
use crate::types::{
    Expanders, Module, ModuleSchema, ProcessArgs, ScaleProvider, load_field, merge_params,
    state_object,
};

use super::range::RangeMapper;
use super::scale::{BuiltinScale, CustomScale, Scale, quantize};
use super::track::{NUM_STEPS, Track};

pub const MODULE_TYPE: &str = "slips";

/// Width of the end-of-cycle trigger, in seconds.
pub const EOC_PULSE_SECONDS: f32 = 1e-3;
const EOC_VOLTAGE: f32 = 10.0;
const MAX_VOLTAGE: f32 = 10.0;

pub const INPUTS: [&str; 10] = [
    "clock", "reset", "root", "scale", "steps", "start", "prob", "slips", "genSeq", "genMod",
];
pub const OUTPUTS: [&str; 5] = ["seq", "gate", "slipGate", "eoc", "mod"];

fn default_steps() -> usize {
    16
}

fn default_start() -> usize {
    1
}

fn default_prob() -> f32 {
    1.0
}

fn default_seq_range() -> RangeMapper {
    RangeMapper::new(-1.0, 1.0)
}

fn default_mod_range() -> RangeMapper {
    RangeMapper::new(0.0, 10.0)
}

fn default_slip_range() -> RangeMapper {
    RangeMapper::new(-1.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SlipsParams {
    /// Root note, 0 = C .. 11 = B
    pub root: u8,
    /// Builtin scale used when no custom scale is linked
    pub scale: BuiltinScale,
    /// Steps per cycle (1-64)
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// First step of the cycle (1-64)
    #[serde(default = "default_start")]
    pub start: usize,
    /// Probability that a clocked step plays (0-1)
    #[serde(default = "default_prob")]
    pub prob: f32,
    /// Share of the 64 steps that slip each cycle (0-1)
    pub slip_amount: f32,
    /// Momentary button: regenerate the main sequence
    pub gen_seq: bool,
    /// Momentary button: regenerate the modulation sequence
    pub gen_mod: bool,
    /// Store tracks already mapped through their range
    pub remap_on_generate: bool,
    /// Read the root input as 1V/oct pitch instead of a 0-10V selector
    pub root_is_pitch: bool,
    /// Quantize the modulation output too
    pub mod_quantize: bool,
    /// Add slips to the modulation output
    pub mod_add_slips: bool,
    /// Freeze the modulation output on skipped steps
    pub mod_add_probability: bool,
    /// Extra polyphonic lanes (0-15); outputs carry `channels + 1` lanes
    pub channels: usize,
    /// Fan the modulation output out like the main sequence
    pub poly_mod: bool,
    #[serde(default = "default_seq_range")]
    pub seq_range: RangeMapper,
    #[serde(default = "default_mod_range")]
    pub mod_range: RangeMapper,
    #[serde(default = "default_slip_range")]
    pub slip_range: RangeMapper,
    /// Fixed random seed, for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SlipsParams {
    fn default() -> Self {
        Self {
            root: 0,
            scale: BuiltinScale::default(),
            steps: default_steps(),
            start: default_start(),
            prob: default_prob(),
            slip_amount: 0.0,
            gen_seq: false,
            gen_mod: false,
            remap_on_generate: false,
            root_is_pitch: false,
            mod_quantize: false,
            mod_add_slips: false,
            mod_add_probability: false,
            channels: 0,
            poly_mod: false,
            seq_range: default_seq_range(),
            mod_range: default_mod_range(),
            slip_range: default_slip_range(),
            seed: None,
        }
    }
}

impl SlipsParams {
    fn sanitize(&mut self) {
        self.root = self.root.min(11);
        self.steps = self.steps.clamp(1, NUM_STEPS);
        self.start = self.start.clamp(1, NUM_STEPS);
        self.prob = self.prob.clamp(0.0, 1.0);
        self.slip_amount = self.slip_amount.clamp(0.0, 1.0);
        self.channels = self.channels.min(PORT_MAX_CHANNELS - 1);
    }
}

/// Cursor and latches, saved with the module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SequencerState {
    pub current_step: usize,
    pub steps_gone_through: usize,
    pub starting_step: usize,
    pub num_steps: usize,
    pub curr_channel: usize,
    pub slips_generated: bool,
    pub skip_step: bool,
    pub last_value: f32,
    pub last_mod_value: f32,
}

impl Default for SequencerState {
    fn default() -> Self {
        Self {
            current_step: 0,
            steps_gone_through: 0,
            starting_step: 0,
            num_steps: default_steps(),
            curr_channel: 0,
            slips_generated: false,
            skip_step: false,
            last_value: 0.0,
            last_mod_value: 0.0,
        }
    }
}

impl SequencerState {
    fn sanitize(&mut self) {
        self.current_step = self.current_step.min(NUM_STEPS - 1);
        self.starting_step = self.starting_step.min(NUM_STEPS - 1);
        self.num_steps = self.num_steps.clamp(1, NUM_STEPS);
        self.curr_channel = self.curr_channel.min(PORT_MAX_CHANNELS - 1);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SlipsInputs {
    clock: PolySignal,
    reset: PolySignal,
    root: PolySignal,
    scale: PolySignal,
    steps: PolySignal,
    start: PolySignal,
    prob: PolySignal,
    slips: PolySignal,
    gen_seq: PolySignal,
    gen_mod: PolySignal,
}

impl SlipsInputs {
    fn port_mut(&mut self, port: &str) -> Option<&mut PolySignal> {
        Some(match port {
            "clock" => &mut self.clock,
            "reset" => &mut self.reset,
            "root" => &mut self.root,
            "scale" => &mut self.scale,
            "steps" => &mut self.steps,
            "start" => &mut self.start,
            "prob" => &mut self.prob,
            "slips" => &mut self.slips,
            "genSeq" => &mut self.gen_seq,
            "genMod" => &mut self.gen_mod,
            _ => return None,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SlipsOutputs {
    seq: PolyOutput,
    gate: PolyOutput,
    slip_gate: PolyOutput,
    eoc: PolyOutput,
    mod_out: PolyOutput,
}

#[derive(Debug, Clone, Copy)]
struct SlipsLights {
    steps: [f32; NUM_STEPS],
    gate: f32,
    slip_gate: f32,
    eoc: f32,
    expander: f32,
}

impl Default for SlipsLights {
    fn default() -> Self {
        Self {
            steps: [0.0; NUM_STEPS],
            gate: 0.0,
            slip_gate: 0.0,
            eoc: 0.0,
            expander: 0.0,
        }
    }
}

/// Knob and CV values resolved for one sample.
#[derive(Debug, Clone, Copy)]
struct Controls {
    root: u8,
    scale: BuiltinScale,
    num_steps: usize,
    starting_step: usize,
    prob: f32,
    slip_amount: f32,
}

#[derive(Default)]
struct Triggers {
    clock: SchmittTrigger,
    reset: SchmittTrigger,
    gen_seq_input: SchmittTrigger,
    gen_mod_input: SchmittTrigger,
    gen_seq_button: SchmittTrigger,
    gen_mod_button: SchmittTrigger,
}

/// Copy of the linked expander's selection.
struct ExpanderLink {
    revision: u64,
    /// `None` when the expander has no notes selected
    scale: Option<Scale>,
}

pub struct Slips {
    params: SlipsParams,
    inputs: SlipsInputs,
    outputs: SlipsOutputs,
    lights: SlipsLights,
    state: SequencerState,
    sequence: Track,
    mod_sequence: Track,
    slips: Track,
    triggers: Triggers,
    eoc_pulse: PulseGenerator,
    link: Option<ExpanderLink>,
    rng: StdRng,
    seed: u64,
}

impl Default for Slips {
    fn default() -> Self {
        Self::new()
    }
}

impl Slips {
    /// A fresh module with an unpredictable seed and generated tracks.
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// A fresh module whose random draws are fully determined by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        let mut module = Self {
            params: SlipsParams::default(),
            inputs: SlipsInputs::default(),
            outputs: SlipsOutputs::default(),
            lights: SlipsLights::default(),
            state: SequencerState::default(),
            sequence: Track::default(),
            mod_sequence: Track::default(),
            slips: Track::default(),
            triggers: Triggers::default(),
            eoc_pulse: PulseGenerator::default(),
            link: None,
            rng: StdRng::seed_from_u64(seed),
            seed,
        };
        module.generate_sequence();
        module.generate_mod_sequence();
        module
    }

    pub fn schema() -> ModuleSchema {
        ModuleSchema::new::<SlipsParams>(
            MODULE_TYPE,
            "Random step sequencer with probabilistic skips, per-cycle slips and scale quantization",
            &INPUTS,
            &OUTPUTS,
        )
    }

    pub fn params(&self) -> &SlipsParams {
        &self.params
    }

    pub fn state(&self) -> &SequencerState {
        &self.state
    }

    pub fn sequence(&self) -> &Track {
        &self.sequence
    }

    pub fn mod_sequence(&self) -> &Track {
        &self.mod_sequence
    }

    pub fn slips(&self) -> &Track {
        &self.slips
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Whether a scale expander was seen on the last tick.
    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    /// Restart the random stream from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Number of lanes on the polyphonic outputs.
    pub fn channel_count(&self) -> usize {
        self.params.channels.min(PORT_MAX_CHANNELS - 1) + 1
    }

    fn remap_range(&self, range: RangeMapper) -> Option<RangeMapper> {
        self.params.remap_on_generate.then_some(range)
    }

    /// Refill the main sequence.
    pub fn generate_sequence(&mut self) {
        let mapping = self.remap_range(self.params.seq_range);
        self.sequence.randomize(&mut self.rng, mapping.as_ref());
        tracing::debug!(remapped = mapping.is_some(), "generated sequence");
    }

    /// Refill the modulation sequence.
    pub fn generate_mod_sequence(&mut self) {
        let mapping = self.remap_range(self.params.mod_range);
        self.mod_sequence.randomize(&mut self.rng, mapping.as_ref());
        tracing::debug!(remapped = mapping.is_some(), "generated mod sequence");
    }

    /// Clear all slips, then place `floor(64 * amount)` of them on distinct steps.
    pub fn generate_slips(&mut self, amount: f32) {
        let mapping = self.remap_range(self.params.slip_range);
        self.slips.clear();

        let num_slips = (NUM_STEPS as f32 * amount.clamp(0.0, 1.0)).floor() as usize;
        for _ in 0..num_slips {
            let slot = loop {
                let candidate = self.rng.random_range(0..NUM_STEPS);
                if self.slips[candidate] == 0.0 {
                    break candidate;
                }
            };
            self.slips[slot] = nonzero_slip(&mut self.rng, mapping.as_ref());
        }
    }

    fn sync_expander(&mut self, provider: Option<&dyn ScaleProvider>) {
        let Some(provider) = provider else {
            if self.link.take().is_some() {
                tracing::debug!("scale expander unlinked, using builtin scale");
            }
            return;
        };

        let notes = provider.selected_notes();
        let stale = match &self.link {
            None => {
                tracing::debug!(?notes, "scale expander linked");
                true
            }
            Some(link) => {
                let cached = match &link.scale {
                    Some(scale) => scale.intervals(),
                    None => &[],
                };
                link.revision != provider.revision() || cached != notes
            }
        };
        if stale {
            self.link = Some(ExpanderLink {
                revision: provider.revision(),
                scale: CustomScale::new(notes).ok().map(Scale::Custom),
            });
        }
    }

    fn read_controls(&self) -> Controls {
        let inputs = &self.inputs;
        let params = &self.params;

        let root = if inputs.root.is_disconnected() {
            params.root
        } else {
            let cv = inputs.root.get_value(0);
            if params.root_is_pitch {
                let fraction = cv - cv.floor();
                ((fraction * 12.0).round() as u8) % 12
            } else {
                cv_to_range(cv, 0.0, 11.0).round() as u8
            }
        };

        let scale = if inputs.scale.is_disconnected() {
            params.scale
        } else {
            BuiltinScale::from_index(cv_to_range(inputs.scale.get_value(0), 0.0, 10.0).round() as usize)
        };

        let steps = if inputs.steps.is_disconnected() {
            params.steps
        } else {
            cv_to_range(inputs.steps.get_value(0), 1.0, NUM_STEPS as f32).round() as usize
        };

        let start = if inputs.start.is_disconnected() {
            params.start
        } else {
            cv_to_range(inputs.start.get_value(0), 1.0, NUM_STEPS as f32).round() as usize
        };

        let prob = if inputs.prob.is_disconnected() {
            params.prob
        } else {
            cv_to_range(inputs.prob.get_value(0), 0.0, 1.0)
        };

        let slip_amount = if inputs.slips.is_disconnected() {
            params.slip_amount
        } else {
            cv_to_range(inputs.slips.get_value(0), 0.0, 1.0)
        };

        Controls {
            root: root.min(11),
            scale,
            num_steps: steps.clamp(1, NUM_STEPS),
            starting_step: start.clamp(1, NUM_STEPS) - 1,
            prob,
            slip_amount,
        }
    }

    fn handle_generate_triggers(&mut self) {
        let button = |pressed: bool| if pressed { 10.0 } else { 0.0 };

        let seq_button = self.triggers.gen_seq_button.process(button(self.params.gen_seq));
        let seq_input = self
            .triggers
            .gen_seq_input
            .process(self.inputs.gen_seq.get_value(0));
        if seq_button || seq_input {
            self.generate_sequence();
        }

        let mod_button = self.triggers.gen_mod_button.process(button(self.params.gen_mod));
        let mod_input = self
            .triggers
            .gen_mod_input
            .process(self.inputs.gen_mod.get_value(0));
        if mod_button || mod_input {
            self.generate_mod_sequence();
        }
    }

    fn reset(&mut self) {
        self.state.current_step = self.state.starting_step;
        self.state.steps_gone_through = 0;
        self.state.slips_generated = false;
    }

    fn advance(&mut self, step_probability: f32) {
        let channels = self.channel_count();
        let state = &mut self.state;

        state.current_step = (state.current_step + 1) % NUM_STEPS;
        state.curr_channel = (state.curr_channel + 1) % channels;

        state.steps_gone_through += 1;
        if state.steps_gone_through >= state.num_steps {
            state.current_step = state.starting_step;
            state.steps_gone_through = 0;
            state.slips_generated = false;
            self.eoc_pulse.trigger(EOC_PULSE_SECONDS);
        }

        let draw: f32 = self.rng.random();
        state.skip_step = draw > step_probability;
    }

    /// Re-roll slips once per cycle, the first time the cursor sits on the starting step.
    fn update_slip_latch(&mut self, slip_amount: f32) {
        if self.state.current_step == self.state.starting_step {
            if !self.state.slips_generated {
                self.generate_slips(slip_amount);
                self.state.slips_generated = true;
            }
        } else {
            self.state.slips_generated = false;
        }
    }

    /// Stored track value as a clamped voltage.
    fn track_voltage(&self, value: f32, range: &RangeMapper) -> f32 {
        let volts = if self.params.remap_on_generate {
            value
        } else {
            range.map(value)
        };
        volts.clamp(-MAX_VOLTAGE, MAX_VOLTAGE)
    }

    fn write_outputs(&mut self, args: &ProcessArgs, controls: &Controls, clock_voltage: f32) {
        let channels = self.channel_count();
        self.state.curr_channel %= channels;
        let lane = self.state.curr_channel;
        let step = self.state.current_step;
        let skip = self.state.skip_step;

        let slip = self.slips[step];
        let is_slip = slip != 0.0;
        let slip_offset = if is_slip {
            self.track_voltage(slip, &self.params.slip_range)
        } else {
            0.0
        };

        let mut pitch = self.track_voltage(self.sequence[step], &self.params.seq_range);
        if is_slip {
            pitch = (pitch + slip_offset).clamp(-MAX_VOLTAGE, MAX_VOLTAGE);
        }
        if skip {
            pitch = self.state.last_value;
        } else {
            self.state.last_value = pitch;
        }

        let builtin = Scale::Builtin(controls.scale);
        let scale = self
            .link
            .as_ref()
            .and_then(|link| link.scale.as_ref())
            .unwrap_or(&builtin);

        self.outputs.seq.set_channels(channels);
        self.outputs.gate.set_channels(channels);
        // a skipped step replays the held pitch on the lane it lands on
        self.outputs.seq.set(lane, quantize(pitch, controls.root, scale));
        for c in 0..channels {
            let gate = if c == lane && !skip { clock_voltage } else { 0.0 };
            self.outputs.gate.set(c, gate);
        }

        let mut mod_value = self.track_voltage(self.mod_sequence[step], &self.params.mod_range);
        if self.params.mod_add_slips && is_slip {
            mod_value = (mod_value + slip_offset).clamp(-MAX_VOLTAGE, MAX_VOLTAGE);
        }
        let mod_frozen = self.params.mod_add_probability && skip;
        if mod_frozen {
            mod_value = self.state.last_mod_value;
        } else {
            self.state.last_mod_value = mod_value;
        }
        if self.params.mod_quantize {
            mod_value = quantize(mod_value, controls.root, scale);
        }
        if self.params.poly_mod {
            self.outputs.mod_out.set_channels(channels);
            self.outputs.mod_out.set(lane, mod_value);
        } else {
            self.outputs.mod_out.set_channels(1);
            self.outputs.mod_out.set(0, mod_value);
        }

        let slip_gate = if is_slip { clock_voltage } else { 0.0 };
        self.outputs.slip_gate = PolyOutput::mono(slip_gate);

        let eoc_high = self.eoc_pulse.process(args.sample_time);
        let eoc = if eoc_high { EOC_VOLTAGE } else { 0.0 };
        self.outputs.eoc = PolyOutput::mono(eoc);

        for (i, light) in self.lights.steps.iter_mut().enumerate() {
            *light = if i == step { 1.0 } else { 0.0 };
        }
        self.lights.gate = (self.outputs.gate.get(lane) / MAX_VOLTAGE).clamp(0.0, 1.0);
        self.lights.slip_gate = (slip_gate / MAX_VOLTAGE).clamp(0.0, 1.0);
        self.lights.eoc = if eoc_high { 1.0 } else { 0.0 };
        self.lights.expander = if self.link.is_some() { 1.0 } else { 0.0 };
    }
}

/// A random slip value that is never exactly zero, since zero marks "no slip".
fn nonzero_slip(rng: &mut StdRng, mapping: Option<&RangeMapper>) -> f32 {
    for _ in 0..16 {
        let x: f32 = rng.random();
        let value = mapping.map_or(x, |range| range.map(x));
        if value != 0.0 {
            return value;
        }
    }
    // only reachable with a 0..0 slip range
    f32::MIN_POSITIVE
}

impl Module for Slips {
    fn get_module_type(&self) -> &'static str {
        MODULE_TYPE
    }

    fn process(&mut self, args: &ProcessArgs, expanders: &Expanders) {
        self.sync_expander(expanders.right_scale_provider());

        let controls = self.read_controls();
        self.state.num_steps = controls.num_steps;
        self.state.starting_step = controls.starting_step;

        self.handle_generate_triggers();

        // reset is evaluated before clock so a simultaneous pair lands one step past start
        let clock_voltage = self.inputs.clock.get_value(0);
        if self.triggers.reset.process(self.inputs.reset.get_value(0)) {
            self.reset();
        }
        if self.triggers.clock.process(clock_voltage) {
            self.advance(controls.prob);
        }

        self.update_slip_latch(controls.slip_amount);
        self.write_outputs(args, &controls, clock_voltage);
    }

    fn set_input(&mut self, port: &str, signal: PolySignal) -> Result<()> {
        let input = self
            .inputs
            .port_mut(port)
            .ok_or_else(|| ModuleError::UnknownInput {
                module: MODULE_TYPE,
                port: port.to_string(),
            })?;
        *input = signal;
        Ok(())
    }

    fn get_poly_sample(&self, port: &str) -> Result<PolyOutput> {
        Ok(match port {
            "seq" => self.outputs.seq,
            "gate" => self.outputs.gate,
            "slipGate" => self.outputs.slip_gate,
            "eoc" => self.outputs.eoc,
            "mod" => self.outputs.mod_out,
            _ => {
                return Err(ModuleError::UnknownOutput {
                    module: MODULE_TYPE,
                    port: port.to_string(),
                });
            }
        })
    }

    fn get_light(&self, light: &str, index: usize) -> Option<f32> {
        match light {
            "step" => self.lights.steps.get(index).copied(),
            "gate" => Some(self.lights.gate),
            "slipGate" => Some(self.lights.slip_gate),
            "eoc" => Some(self.lights.eoc),
            "expander" => Some(self.lights.expander),
            _ => None,
        }
    }

    fn try_update_params(&mut self, params: Value) -> Result<()> {
        let mut updated: SlipsParams = merge_params(MODULE_TYPE, &self.params, params)?;
        updated.sanitize();
        if let Some(seed) = updated.seed {
            if updated.seed != self.params.seed {
                self.reseed(seed);
            }
        }
        self.params = updated;
        Ok(())
    }

    fn get_state(&self) -> Value {
        let p = &self.params;
        json!({
            "sequence": self.sequence,
            "modSequence": self.mod_sequence,
            "slips": self.slips,
            "seqRange": p.seq_range,
            "modRange": p.mod_range,
            "slipRange": p.slip_range,
            "remapOnGenerate": p.remap_on_generate,
            "rootIsPitch": p.root_is_pitch,
            "modQuantize": p.mod_quantize,
            "modAddSlips": p.mod_add_slips,
            "modAddProbability": p.mod_add_probability,
            "channels": p.channels,
            "polyMod": p.poly_mod,
            "root": p.root,
            "scale": p.scale,
            "steps": p.steps,
            "start": p.start,
            "prob": p.prob,
            "slipAmount": p.slip_amount,
            "seed": self.seed,
            "state": self.state,
        })
    }

    fn load_state(&mut self, state: &Value) -> Result<()> {
        let doc = state_object(MODULE_TYPE, state)?;

        load_field(MODULE_TYPE, doc, "sequence", &mut self.sequence);
        load_field(MODULE_TYPE, doc, "modSequence", &mut self.mod_sequence);
        load_field(MODULE_TYPE, doc, "slips", &mut self.slips);

        let p = &mut self.params;
        load_field(MODULE_TYPE, doc, "seqRange", &mut p.seq_range);
        load_field(MODULE_TYPE, doc, "modRange", &mut p.mod_range);
        load_field(MODULE_TYPE, doc, "slipRange", &mut p.slip_range);
        load_field(MODULE_TYPE, doc, "remapOnGenerate", &mut p.remap_on_generate);
        load_field(MODULE_TYPE, doc, "rootIsPitch", &mut p.root_is_pitch);
        load_field(MODULE_TYPE, doc, "modQuantize", &mut p.mod_quantize);
        load_field(MODULE_TYPE, doc, "modAddSlips", &mut p.mod_add_slips);
        load_field(MODULE_TYPE, doc, "modAddProbability", &mut p.mod_add_probability);
        load_field(MODULE_TYPE, doc, "channels", &mut p.channels);
        load_field(MODULE_TYPE, doc, "polyMod", &mut p.poly_mod);
        load_field(MODULE_TYPE, doc, "root", &mut p.root);
        load_field(MODULE_TYPE, doc, "scale", &mut p.scale);
        load_field(MODULE_TYPE, doc, "steps", &mut p.steps);
        load_field(MODULE_TYPE, doc, "start", &mut p.start);
        load_field(MODULE_TYPE, doc, "prob", &mut p.prob);
        load_field(MODULE_TYPE, doc, "slipAmount", &mut p.slip_amount);
        p.sanitize();

        let mut seed = self.seed;
        load_field(MODULE_TYPE, doc, "seed", &mut seed);
        self.reseed(seed);

        load_field(MODULE_TYPE, doc, "state", &mut self.state);
        self.state.sanitize();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 1000.0;

    fn args() -> ProcessArgs {
        ProcessArgs::new(SAMPLE_RATE)
    }

    fn tick(slips: &mut Slips) {
        slips.process(&args(), &Expanders::default());
    }

    /// One full clock period: a high sample then a low one.
    fn clock(slips: &mut Slips) {
        slips.set_input("clock", PolySignal::mono(10.0)).unwrap();
        tick(slips);
        slips.set_input("clock", PolySignal::mono(0.0)).unwrap();
        tick(slips);
    }

    fn fresh(params: Value) -> Slips {
        let mut slips = Slips::with_seed(42);
        slips.try_update_params(params).unwrap();
        slips.set_input("clock", PolySignal::mono(0.0)).unwrap();
        tick(&mut slips);
        slips
    }

    #[test]
    fn cycle_wraps_after_num_steps() {
        let mut slips = fresh(json!({ "steps": 4 }));
        assert_eq!(slips.state().current_step, 0);

        let mut eoc_edges = 0;
        let mut last_eoc = 0.0;
        for edge in 1..=4 {
            slips.set_input("clock", PolySignal::mono(10.0)).unwrap();
            tick(&mut slips);
            let eoc = slips.get_poly_sample("eoc").unwrap().get(0);
            if eoc > 0.0 && last_eoc == 0.0 {
                eoc_edges += 1;
            }
            last_eoc = eoc;
            slips.set_input("clock", PolySignal::mono(0.0)).unwrap();
            for _ in 0..5 {
                tick(&mut slips);
                last_eoc = slips.get_poly_sample("eoc").unwrap().get(0);
            }
            if edge < 4 {
                assert_eq!(slips.state().current_step, edge);
                assert_eq!(slips.state().steps_gone_through, edge);
            }
        }
        assert_eq!(slips.state().current_step, 0);
        assert_eq!(slips.state().steps_gone_through, 0);
        assert_eq!(eoc_edges, 1);
    }

    #[test]
    fn cycle_restarts_at_starting_step() {
        let mut slips = fresh(json!({ "steps": 3, "start": 10 }));
        // cursor starts at 0 and runs until the first wrap
        for _ in 0..3 {
            clock(&mut slips);
        }
        assert_eq!(slips.state().current_step, 9);
        clock(&mut slips);
        assert_eq!(slips.state().current_step, 10);
    }

    #[test]
    fn raw_index_wraps_past_63() {
        let mut slips = fresh(json!({ "steps": 64, "start": 64 }));
        // first cycle from step 0 ends on the start step (63)
        for _ in 0..64 {
            clock(&mut slips);
        }
        assert_eq!(slips.state().current_step, 63);
        clock(&mut slips);
        assert_eq!(slips.state().current_step, 0);
        assert!(slips.state().current_step < NUM_STEPS);
    }

    #[test]
    fn reset_returns_to_start() {
        let mut slips = fresh(json!({ "steps": 8, "start": 3 }));
        for _ in 0..5 {
            clock(&mut slips);
        }
        slips.set_input("reset", PolySignal::mono(10.0)).unwrap();
        tick(&mut slips);
        assert_eq!(slips.state().current_step, 2);
        assert_eq!(slips.state().steps_gone_through, 0);
    }

    #[test]
    fn reset_is_processed_before_clock() {
        let mut slips = fresh(json!({ "steps": 8 }));
        slips.set_input("reset", PolySignal::mono(0.0)).unwrap();
        tick(&mut slips);
        for _ in 0..3 {
            clock(&mut slips);
        }
        slips.set_input("reset", PolySignal::mono(10.0)).unwrap();
        slips.set_input("clock", PolySignal::mono(10.0)).unwrap();
        tick(&mut slips);
        assert_eq!(slips.state().current_step, 1);
        assert_eq!(slips.state().steps_gone_through, 1);
    }

    #[test]
    fn slip_count_matches_amount() {
        let mut slips = Slips::with_seed(3);
        slips.generate_slips(0.5);
        assert_eq!(slips.slips().count_nonzero(), 32);

        slips.generate_slips(1.0);
        assert_eq!(slips.slips().count_nonzero(), 64);

        slips.generate_slips(0.0);
        assert_eq!(slips.slips().count_nonzero(), 0);

        slips.generate_slips(0.1);
        assert_eq!(slips.slips().count_nonzero(), 6);
    }

    #[test]
    fn slips_regenerate_once_per_cycle() {
        let mut slips = fresh(json!({ "steps": 4, "slipAmount": 0.5 }));
        let first = *slips.slips();
        assert_eq!(first.count_nonzero(), 32);

        // mid-cycle ticks never touch the slips
        for _ in 0..3 {
            clock(&mut slips);
            assert_eq!(*slips.slips(), first);
        }
        clock(&mut slips);
        assert_ne!(*slips.slips(), first);
        assert_eq!(slips.slips().count_nonzero(), 32);
    }

    #[test]
    fn slips_regenerate_every_clock_for_single_step_cycles() {
        let mut slips = fresh(json!({ "steps": 1, "slipAmount": 0.25 }));
        let mut previous = *slips.slips();
        for _ in 0..4 {
            clock(&mut slips);
            assert_ne!(*slips.slips(), previous);
            previous = *slips.slips();
        }
    }

    #[test]
    fn skipped_steps_freeze_output() {
        let mut slips = fresh(json!({ "prob": 0.0, "scale": "chromatic" }));
        let held = slips.get_poly_sample("seq").unwrap().get(0);
        for _ in 0..20 {
            clock(&mut slips);
            assert!(slips.state().skip_step);
            assert_eq!(slips.get_poly_sample("seq").unwrap().get(0), held);
        }
        assert_ne!(slips.state().current_step, 0);
    }

    #[test]
    fn skipped_steps_replay_held_pitch_on_the_next_lane() {
        let mut slips = fresh(json!({
            "channels": 1,
            "prob": 0.0,
            "scale": "chromatic",
            "polyMod": true,
            "modAddProbability": true,
            "seqRange": { "a": 1.0, "b": 2.0 }
        }));
        let seq = slips.get_poly_sample("seq").unwrap();
        let modulation = slips.get_poly_sample("mod").unwrap();
        assert_eq!(slips.state().curr_channel, 0);

        clock(&mut slips);
        assert!(slips.state().skip_step);
        assert_eq!(slips.state().curr_channel, 1);
        let after = slips.get_poly_sample("seq").unwrap();
        assert_eq!(after.get(0), seq.get(0));
        assert_eq!(after.get(1), seq.get(0));
        assert_eq!(slips.get_poly_sample("mod").unwrap().get(1), modulation.get(0));
        assert_eq!(slips.get_poly_sample("gate").unwrap().get(1), 0.0);
    }

    #[test]
    fn skipped_steps_requantize_the_held_pitch() {
        let mut slips = fresh(json!({ "prob": 0.0, "scale": "major" }));
        let held = slips.state().last_value;
        slips.try_update_params(json!({ "root": 1 })).unwrap();
        clock(&mut slips);
        assert!(slips.state().skip_step);
        let expected = quantize(held, 1, &Scale::Builtin(BuiltinScale::Major));
        assert_eq!(slips.get_poly_sample("seq").unwrap().get(0), expected);
    }

    #[test]
    fn full_probability_never_skips() {
        let mut slips = fresh(json!({ "prob": 1.0 }));
        for _ in 0..50 {
            clock(&mut slips);
            assert!(!slips.state().skip_step);
        }
    }

    #[test]
    fn output_follows_sequence_through_range() {
        let mut slips = fresh(json!({ "scale": "chromatic", "seqRange": { "a": 0.0, "b": 2.0 } }));
        for _ in 0..6 {
            clock(&mut slips);
            let step = slips.state().current_step;
            let expected = quantize(
                slips.sequence()[step] * 2.0,
                0,
                &Scale::Builtin(BuiltinScale::Chromatic),
            );
            let out = slips.get_poly_sample("seq").unwrap().get(0);
            assert!((out - expected).abs() < 1e-5, "step {step}: {out} vs {expected}");
        }
    }

    #[test]
    fn remap_on_generate_changes_what_is_stored() {
        let mut slips = fresh(json!({ "remapOnGenerate": true, "seqRange": { "a": 5.0, "b": 6.0 } }));
        slips.generate_sequence();
        assert!(slips.sequence().values().iter().all(|v| (5.0..=6.0).contains(v)));

        // flipping the flag back does not touch stored values
        let stored = *slips.sequence();
        slips.try_update_params(json!({ "remapOnGenerate": false })).unwrap();
        assert_eq!(*slips.sequence(), stored);
    }

    #[test]
    fn generate_button_regenerates_on_press_only() {
        let mut slips = fresh(json!({}));
        let before = *slips.sequence();
        slips.try_update_params(json!({ "genSeq": true })).unwrap();
        tick(&mut slips);
        let after = *slips.sequence();
        assert_ne!(before, after);

        // holding the button does not keep regenerating
        tick(&mut slips);
        assert_eq!(*slips.sequence(), after);
    }

    #[test]
    fn generate_input_edge_regenerates_mod_sequence() {
        let mut slips = fresh(json!({}));
        slips.set_input("genMod", PolySignal::mono(0.0)).unwrap();
        tick(&mut slips);
        let before = *slips.mod_sequence();
        let seq_before = *slips.sequence();
        slips.set_input("genMod", PolySignal::mono(10.0)).unwrap();
        tick(&mut slips);
        assert_ne!(*slips.mod_sequence(), before);
        assert_eq!(*slips.sequence(), seq_before);
    }

    #[test]
    fn polyphonic_round_robin() {
        let mut slips = fresh(json!({ "channels": 2, "scale": "chromatic" }));
        assert_eq!(slips.channel_count(), 3);

        clock(&mut slips);
        assert_eq!(slips.state().curr_channel, 1);
        let seq = slips.get_poly_sample("seq").unwrap();
        assert_eq!(seq.channels(), 3);
        let lane1 = seq.get(1);

        clock(&mut slips);
        assert_eq!(slips.state().curr_channel, 2);
        // lane 1 keeps its voltage while lane 2 is written
        assert_eq!(slips.get_poly_sample("seq").unwrap().get(1), lane1);

        clock(&mut slips);
        assert_eq!(slips.state().curr_channel, 0);
    }

    #[test]
    fn gate_mirrors_clock_on_active_lane() {
        let mut slips = fresh(json!({ "channels": 1 }));
        slips.set_input("clock", PolySignal::mono(8.0)).unwrap();
        tick(&mut slips);
        let gate = slips.get_poly_sample("gate").unwrap();
        assert_eq!(gate.get(1), 8.0);
        assert_eq!(gate.get(0), 0.0);
        assert_eq!(slips.get_light("gate", 0), Some(0.8));

        slips.set_input("clock", PolySignal::mono(0.0)).unwrap();
        tick(&mut slips);
        assert_eq!(slips.get_poly_sample("gate").unwrap().get(1), 0.0);
    }

    #[test]
    fn mono_mod_output_by_default() {
        let mut slips = fresh(json!({ "channels": 3 }));
        clock(&mut slips);
        let mod_out = slips.get_poly_sample("mod").unwrap();
        assert_eq!(mod_out.channels(), 1);
        let step = slips.state().current_step;
        let expected = slips.mod_sequence()[step] * 10.0;
        assert!((mod_out.get(0) - expected).abs() < 1e-4);
    }

    #[test]
    fn poly_mod_fans_out() {
        let mut slips = fresh(json!({ "channels": 3, "polyMod": true }));
        clock(&mut slips);
        let mod_out = slips.get_poly_sample("mod").unwrap();
        assert_eq!(mod_out.channels(), 4);
        let expected = slips.mod_sequence()[slips.state().current_step] * 10.0;
        assert!((mod_out.get(1) - expected).abs() < 1e-4);
    }

    #[test]
    fn mod_quantize_snaps_to_scale() {
        let mut slips = fresh(json!({ "modQuantize": true, "scale": "majorPentatonic", "root": 2 }));
        clock(&mut slips);
        let value = slips.get_poly_sample("mod").unwrap().get(0);
        let semitone = ((value - value.floor()) * 12.0).round() as u8 % 12;
        let allowed: Vec<u8> = BuiltinScale::MajorPentatonic
            .intervals()
            .iter()
            .map(|m| (m + 2) % 12)
            .collect();
        assert!(allowed.contains(&semitone), "{value} not in scale");
    }

    #[test]
    fn slip_gate_follows_slip_steps() {
        let mut slips = fresh(json!({ "slipAmount": 1.0 }));
        slips.set_input("clock", PolySignal::mono(10.0)).unwrap();
        tick(&mut slips);
        assert_eq!(slips.get_poly_sample("slipGate").unwrap().get(0), 10.0);
        assert_eq!(slips.get_light("slipGate", 0), Some(1.0));

        let mut quiet = fresh(json!({ "slipAmount": 0.0 }));
        quiet.set_input("clock", PolySignal::mono(10.0)).unwrap();
        tick(&mut quiet);
        assert_eq!(quiet.get_poly_sample("slipGate").unwrap().get(0), 0.0);
    }

    #[test]
    fn slips_offset_the_pitch() {
        let mut slips = fresh(json!({
            "slipAmount": 1.0,
            "scale": "chromatic",
            "slipRange": { "a": 3.0, "b": 3.0 },
        }));
        let step = slips.state().current_step;
        let base = slips.sequence()[step] * 2.0 - 1.0;
        let expected = quantize(base + 3.0, 0, &Scale::Builtin(BuiltinScale::Chromatic));
        let out = slips.get_poly_sample("seq").unwrap().get(0);
        assert!((out - expected).abs() < 1e-5);
    }

    #[test]
    fn step_lights_track_cursor() {
        let mut slips = fresh(json!({}));
        clock(&mut slips);
        clock(&mut slips);
        assert_eq!(slips.get_light("step", 2), Some(1.0));
        let lit = (0..NUM_STEPS)
            .filter(|i| slips.get_light("step", *i) == Some(1.0))
            .count();
        assert_eq!(lit, 1);
    }

    #[test]
    fn cv_inputs_are_clamped() {
        let mut slips = fresh(json!({}));
        slips.set_input("steps", PolySignal::mono(25.0)).unwrap();
        slips.set_input("start", PolySignal::mono(-4.0)).unwrap();
        slips.set_input("root", PolySignal::mono(99.0)).unwrap();
        slips.set_input("scale", PolySignal::mono(-1.0)).unwrap();
        tick(&mut slips);
        let controls = slips.read_controls();
        assert_eq!(controls.num_steps, 64);
        assert_eq!(controls.starting_step, 0);
        assert_eq!(controls.root, 11);
        assert_eq!(controls.scale, BuiltinScale::Chromatic);
    }

    #[test]
    fn root_as_pitch_voltage() {
        let mut slips = fresh(json!({ "rootIsPitch": true }));
        // 1V/oct: E is 4 semitones above C, in any octave
        slips.set_input("root", PolySignal::mono(2.0 + 4.0 / 12.0)).unwrap();
        assert_eq!(slips.read_controls().root, 4);
        slips.set_input("root", PolySignal::mono(-1.0 + 11.0 / 12.0)).unwrap();
        assert_eq!(slips.read_controls().root, 11);
    }

    #[test]
    fn params_are_sanitized() {
        let mut slips = Slips::with_seed(1);
        slips
            .try_update_params(json!({ "steps": 0, "start": 200, "prob": 3.0, "channels": 40, "root": 30 }))
            .unwrap();
        let p = slips.params();
        assert_eq!((p.steps, p.start, p.prob, p.channels, p.root), (1, 64, 1.0, 15, 11));
        assert_eq!(slips.channel_count(), 16);
    }

    #[test]
    fn partial_params_keep_other_fields() {
        let mut slips = Slips::with_seed(1);
        slips.try_update_params(json!({ "steps": 7 })).unwrap();
        slips.try_update_params(json!({ "root": 3 })).unwrap();
        assert_eq!(slips.params().steps, 7);
        assert_eq!(slips.params().root, 3);
        assert!(slips.try_update_params(json!({ "steps": "many" })).is_err());
        assert_eq!(slips.params().steps, 7);
    }

    #[test]
    fn same_seed_same_run() {
        let run = |seed: u64| {
            let mut slips = Slips::with_seed(seed);
            slips
                .try_update_params(json!({ "prob": 0.6, "slipAmount": 0.3, "steps": 5 }))
                .unwrap();
            let mut out = Vec::new();
            for _ in 0..40 {
                clock(&mut slips);
                out.push(slips.get_poly_sample("seq").unwrap().get(0));
            }
            out
        };
        assert_eq!(run(9), run(9));
        assert_ne!(run(9), run(10));
    }

    #[test]
    fn state_round_trip() {
        let mut slips = fresh(json!({
            "channels": 2,
            "polyMod": true,
            "modQuantize": true,
            "seqRange": { "a": 3.0, "b": -2.0 },
            "slipAmount": 0.4,
        }));
        for _ in 0..5 {
            clock(&mut slips);
        }
        let saved = slips.get_state();

        let mut restored = Slips::with_seed(0);
        restored.load_state(&saved).unwrap();
        assert_eq!(restored.sequence(), slips.sequence());
        assert_eq!(restored.mod_sequence(), slips.mod_sequence());
        assert_eq!(restored.slips(), slips.slips());
        assert_eq!(restored.state(), slips.state());
        assert_eq!(restored.params().seq_range, slips.params().seq_range);
        assert_eq!(restored.params().seq_range.low(), -2.0);
        assert_eq!(restored.params().seq_range.span(), 5.0);
        assert_eq!(restored.params().channels, 2);
        assert!(restored.params().poly_mod);
        assert_eq!(restored.seed(), slips.seed());
        assert_eq!(restored.get_state(), saved);
    }

    #[test]
    fn partial_state_keeps_defaults() {
        let mut slips = Slips::with_seed(5);
        let sequence = *slips.sequence();
        let doc = json!({ "channels": 4, "modSequence": [0.5, 0.5], "polyMod": "yes" });
        slips.load_state(&doc).unwrap();
        assert_eq!(slips.params().channels, 4);
        assert!(!slips.params().poly_mod);
        assert_eq!(*slips.sequence(), sequence);
        assert!(slips.load_state(&json!("nope")).is_err());
    }

    #[test]
    fn loaded_state_is_clamped() {
        let mut slips = Slips::with_seed(5);
        slips
            .load_state(&json!({ "state": { "currentStep": 500, "numSteps": 0 } }))
            .unwrap();
        assert_eq!(slips.state().current_step, 63);
        assert_eq!(slips.state().num_steps, 1);
    }

    #[test]
    fn unknown_ports() {
        let mut slips = Slips::with_seed(1);
        assert!(slips.set_input("volume", PolySignal::mono(1.0)).is_err());
        assert!(slips.get_poly_sample("volume").is_err());
        assert_eq!(slips.get_light("volume", 0), None);
    }
}
