//! Rack host model
//!
//! A `Rack` is a row of slots. Modules sit in slots, and two modules in
//! adjacent slots are each other's expanders. Every `tick()` processes the
//! modules left to right, handing each one a borrowed view of its
//! neighbors. Neighbors are looked up fresh on every tick, so inserting or
//! removing a module takes effect on the next sample.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dsp::get_constructors;
use crate::error::{ModuleError, Result};
use crate::poly::{PolyOutput, PolySignal};
use crate::types::{Expanders, Module, ModuleConstructorMap, ProcessArgs};

/// Saved form of one occupied slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotState {
    pub module_type: String,
    pub state: Value,
}

/// Saved form of a whole rack. `None` marks an empty slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RackState {
    pub slots: Vec<Option<SlotState>>,
}

pub struct Rack {
    slots: Vec<Option<Box<dyn Module>>>,
    args: ProcessArgs,
    constructors: ModuleConstructorMap,
}

impl Rack {
    /// Create an empty rack with `slot_count` slots.
    pub fn new(sample_rate: f32, slot_count: usize) -> Self {
        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, || None);
        Rack {
            slots,
            args: ProcessArgs::new(sample_rate),
            constructors: get_constructors(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn args(&self) -> &ProcessArgs {
        &self.args
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.slots.len() {
            return Err(ModuleError::SlotOutOfBounds {
                slot,
                len: self.slots.len(),
            });
        }
        Ok(())
    }

    /// Place a module into an empty slot.
    pub fn insert(&mut self, slot: usize, module: Box<dyn Module>) -> Result<()> {
        self.check_slot(slot)?;
        if self.slots[slot].is_some() {
            return Err(ModuleError::SlotOccupied(slot));
        }
        tracing::debug!(slot, module_type = module.get_module_type(), "module inserted");
        self.slots[slot] = Some(module);
        Ok(())
    }

    /// Construct a module by type name and place it into an empty slot.
    pub fn insert_new(&mut self, slot: usize, module_type: &str) -> Result<()> {
        let constructor = self
            .constructors
            .get(module_type)
            .ok_or_else(|| ModuleError::UnknownModuleType(module_type.to_string()))?;
        let module = constructor();
        self.insert(slot, module)
    }

    /// Take a module out of its slot. The slot is left empty.
    pub fn remove(&mut self, slot: usize) -> Option<Box<dyn Module>> {
        let module = self.slots.get_mut(slot)?.take()?;
        tracing::debug!(slot, module_type = module.get_module_type(), "module removed");
        Some(module)
    }

    pub fn module(&self, slot: usize) -> Option<&dyn Module> {
        self.slots.get(slot)?.as_deref()
    }

    pub fn module_mut(&mut self, slot: usize) -> Option<&mut (dyn Module + 'static)> {
        self.slots.get_mut(slot)?.as_deref_mut()
    }

    fn occupied_mut(&mut self, slot: usize) -> Result<&mut (dyn Module + 'static)> {
        self.check_slot(slot)?;
        self.module_mut(slot).ok_or(ModuleError::EmptySlot(slot))
    }

    fn occupied(&self, slot: usize) -> Result<&dyn Module> {
        self.check_slot(slot)?;
        self.module(slot).ok_or(ModuleError::EmptySlot(slot))
    }

    pub fn set_input(&mut self, slot: usize, port: &str, signal: PolySignal) -> Result<()> {
        self.occupied_mut(slot)?.set_input(port, signal)
    }

    pub fn output(&self, slot: usize, port: &str) -> Result<PolyOutput> {
        self.occupied(slot)?.get_poly_sample(port)
    }

    pub fn update_params(&mut self, slot: usize, params: Value) -> Result<()> {
        self.occupied_mut(slot)?.try_update_params(params)
    }

    /// Process one sample for every module, left to right.
    pub fn tick(&mut self) {
        profiling::scope!("Rack::tick");
        let args = self.args;
        for index in 0..self.slots.len() {
            let (left, rest) = self.slots.split_at_mut(index);
            let Some((current, right)) = rest.split_first_mut() else {
                continue;
            };
            let Some(module) = current.as_deref_mut() else {
                continue;
            };
            let expanders = Expanders {
                left: left.last().and_then(|slot| slot.as_deref()),
                right: right.first().and_then(|slot| slot.as_deref()),
            };
            module.process(&args, &expanders);
        }
    }

    pub fn save(&self) -> RackState {
        let slots = self
            .slots
            .iter()
            .map(|slot| {
                slot.as_ref().map(|module| SlotState {
                    module_type: module.get_module_type().to_string(),
                    state: module.get_state(),
                })
            })
            .collect();
        RackState { slots }
    }

    /// Rebuild a rack from a saved document.
    pub fn load(sample_rate: f32, saved: &RackState) -> Result<Self> {
        let mut rack = Rack::new(sample_rate, saved.slots.len());
        for (slot, entry) in saved.slots.iter().enumerate() {
            let Some(entry) = entry else {
                continue;
            };
            rack.insert_new(slot, &entry.module_type)?;
            rack.occupied_mut(slot)?.load_state(&entry.state)?;
        }
        Ok(rack)
    }
}
