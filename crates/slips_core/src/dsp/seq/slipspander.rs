//! Slipspander - a 12-note scale selector placed to the right of Slips.
//!
//! Each toggle enables one semitone (C..B). The expander never pushes data:
//! Slips polls its right neighbor every tick, and re-reads the selection
//! when it first sees the expander or when [`ScaleProvider::revision`]
//! moves.

use arrayvec::ArrayVec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ModuleError, Result};
use crate::poly::{PolyOutput, PolySignal};
use crate::types::{
    Expanders, Module, ModuleSchema, ProcessArgs, ScaleProvider, load_field, merge_params,
    state_object,
};

pub const MODULE_TYPE: &str = "slipspander";

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct SlipspanderParams {
    /// Note toggles, C first
    pub notes: [bool; 12],
}

#[derive(Debug, Default)]
pub struct Slipspander {
    params: SlipspanderParams,
    selected: ArrayVec<u8, 12>,
    revision: u64,
    lights: [f32; 12],
}

impl Slipspander {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema() -> ModuleSchema {
        ModuleSchema::new::<SlipspanderParams>(
            MODULE_TYPE,
            "Custom scale selector expander for Slips",
            &[],
            &[],
        )
    }

    pub fn set_note(&mut self, semitone: usize, enabled: bool) {
        if let Some(note) = self.params.notes.get_mut(semitone) {
            *note = enabled;
        }
    }

    pub fn toggle(&mut self, semitone: usize) {
        if let Some(note) = self.params.notes.get_mut(semitone) {
            *note = !*note;
        }
    }

    pub fn notes(&self) -> &[bool; 12] {
        &self.params.notes
    }

    /// Rebuild the ascending selection from the toggles; bump the revision
    /// when it differs from the previous tick.
    fn refresh_selection(&mut self) {
        let mut selected = ArrayVec::<u8, 12>::new();
        for (semitone, enabled) in self.params.notes.iter().enumerate() {
            self.lights[semitone] = if *enabled { 1.0 } else { 0.0 };
            if *enabled {
                selected.push(semitone as u8);
            }
        }
        if selected != self.selected {
            self.selected = selected;
            self.revision = self.revision.wrapping_add(1);
        }
    }
}

impl ScaleProvider for Slipspander {
    fn selected_notes(&self) -> &[u8] {
        &self.selected
    }

    fn revision(&self) -> u64 {
        self.revision
    }
}

impl Module for Slipspander {
    fn get_module_type(&self) -> &'static str {
        MODULE_TYPE
    }

    fn process(&mut self, _args: &ProcessArgs, _expanders: &Expanders) {
        self.refresh_selection();
    }

    fn set_input(&mut self, port: &str, _signal: PolySignal) -> Result<()> {
        Err(ModuleError::UnknownInput {
            module: MODULE_TYPE,
            port: port.to_string(),
        })
    }

    fn get_poly_sample(&self, port: &str) -> Result<PolyOutput> {
        Err(ModuleError::UnknownOutput {
            module: MODULE_TYPE,
            port: port.to_string(),
        })
    }

    fn get_light(&self, light: &str, index: usize) -> Option<f32> {
        match light {
            "note" => self.lights.get(index).copied(),
            _ => None,
        }
    }

    fn try_update_params(&mut self, params: Value) -> Result<()> {
        self.params = merge_params(MODULE_TYPE, &self.params, params)?;
        Ok(())
    }

    fn get_state(&self) -> Value {
        json!({ "notes": self.params.notes })
    }

    fn load_state(&mut self, state: &Value) -> Result<()> {
        let doc = state_object(MODULE_TYPE, state)?;
        load_field(MODULE_TYPE, doc, "notes", &mut self.params.notes);
        // the selection list is derived, rebuild it right away
        self.refresh_selection();
        Ok(())
    }

    fn as_scale_provider(&self) -> Option<&dyn ScaleProvider> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(module: &mut Slipspander) {
        module.process(&ProcessArgs::new(48000.0), &Expanders::default());
    }

    #[test]
    fn selection_is_ascending() {
        let mut s = Slipspander::new();
        for note in [11, 4, 0, 7] {
            s.set_note(note, true);
        }
        tick(&mut s);
        assert_eq!(s.selected_notes(), &[0, 4, 7, 11]);
    }

    #[test]
    fn revision_moves_only_on_change() {
        let mut s = Slipspander::new();
        tick(&mut s);
        let r0 = s.revision();
        assert!(s.selected_notes().is_empty());

        s.toggle(2);
        tick(&mut s);
        let r1 = s.revision();
        assert_ne!(r0, r1);

        tick(&mut s);
        tick(&mut s);
        assert_eq!(s.revision(), r1);

        s.toggle(2);
        tick(&mut s);
        assert_ne!(s.revision(), r1);
        assert!(s.selected_notes().is_empty());
    }

    #[test]
    fn lights_follow_toggles() {
        let mut s = Slipspander::new();
        s.set_note(9, true);
        tick(&mut s);
        assert_eq!(s.get_light("note", 9), Some(1.0));
        assert_eq!(s.get_light("note", 8), Some(0.0));
        assert_eq!(s.get_light("note", 12), None);
    }

    #[test]
    fn state_round_trip_rebuilds_selection() {
        let mut s = Slipspander::new();
        s.set_note(1, true);
        s.set_note(5, true);
        let saved = s.get_state();

        let mut restored = Slipspander::new();
        restored.load_state(&saved).unwrap();
        assert_eq!(restored.selected_notes(), &[1, 5]);
        assert_eq!(restored.notes(), s.notes());
    }

    #[test]
    fn params_json() {
        let mut s = Slipspander::new();
        let mut notes = [false; 12];
        notes[0] = true;
        notes[7] = true;
        s.try_update_params(json!({ "notes": notes })).unwrap();
        tick(&mut s);
        assert_eq!(s.selected_notes(), &[0, 7]);
        assert!(s.try_update_params(json!({ "notes": 3 })).is_err());
    }

    #[test]
    fn has_no_ports() {
        let mut s = Slipspander::new();
        assert!(s.set_input("clock", PolySignal::mono(1.0)).is_err());
        assert!(s.get_poly_sample("seq").is_err());
    }
}
