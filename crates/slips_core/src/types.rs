use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{ModuleError, Result};
use crate::poly::{PolyOutput, PolySignal};

/// Per-sample context handed to every module by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessArgs {
    pub sample_rate: f32,
    /// Seconds elapsed since the previous call.
    pub sample_time: f32,
}

impl ProcessArgs {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            sample_time: 1.0 / sample_rate,
        }
    }
}

/// The modules sitting directly next to a module in the rack, resolved by
/// the host once per tick. Nothing here outlives the tick.
#[derive(Clone, Copy, Default)]
pub struct Expanders<'a> {
    pub left: Option<&'a dyn Module>,
    pub right: Option<&'a dyn Module>,
}

impl<'a> Expanders<'a> {
    /// Scale provider to the right, if that neighbor is one.
    pub fn right_scale_provider(&self) -> Option<&'a dyn ScaleProvider> {
        self.right.and_then(|m| m.as_scale_provider())
    }
}

/// Pull interface for modules that publish a custom scale.
pub trait ScaleProvider {
    /// Selected semitone offsets (0..12) in ascending order. May be empty.
    fn selected_notes(&self) -> &[u8];

    /// Bumped every time the selection changes.
    fn revision(&self) -> u64;
}

/// The host-facing lifecycle of a rack module.
pub trait Module {
    fn get_module_type(&self) -> &'static str;

    /// Produce one sample of output.
    fn process(&mut self, args: &ProcessArgs, expanders: &Expanders);

    /// Patch voltages into an input port.
    fn set_input(&mut self, port: &str, signal: PolySignal) -> Result<()>;

    fn get_poly_sample(&self, port: &str) -> Result<PolyOutput>;

    /// Brightness of a light (0..1). `index` addresses light arrays.
    fn get_light(&self, _light: &str, _index: usize) -> Option<f32> {
        None
    }

    /// Apply a (possibly partial) params document.
    fn try_update_params(&mut self, params: Value) -> Result<()>;

    /// Save hook.
    fn get_state(&self) -> Value;

    /// Load hook. Keys that are missing or malformed keep their current value.
    fn load_state(&mut self, state: &Value) -> Result<()>;

    fn as_scale_provider(&self) -> Option<&dyn ScaleProvider> {
        None
    }
}

pub type ModuleConstructor = fn() -> Box<dyn Module>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSchema {
    pub name: String,
    pub description: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub params_schema: schemars::Schema,
}

impl ModuleSchema {
    pub fn new<P: JsonSchema>(
        name: &str,
        description: &str,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            params_schema: schemars::schema_for!(P),
        }
    }
}

/// Registry of module constructors keyed by module type.
pub type ModuleConstructorMap = HashMap<String, ModuleConstructor>;

/// Read `key` from a saved document into `target`.
///
/// A missing key leaves `target` alone. A key that fails to parse also
/// leaves it alone and is logged, so one corrupt field does not throw away
/// the rest of a document.
pub(crate) fn load_field<T: DeserializeOwned>(
    module: &'static str,
    doc: &serde_json::Map<String, Value>,
    key: &str,
    target: &mut T,
) {
    let Some(value) = doc.get(key) else {
        return;
    };
    match serde_json::from_value::<T>(value.clone()) {
        Ok(parsed) => *target = parsed,
        Err(err) => tracing::warn!(module, key, %err, "ignoring malformed saved field"),
    }
}

/// Overlay a partial params document on the current params.
///
/// Top-level keys present in `patch` replace the current ones; the rest are
/// kept. Nothing changes when the merged document fails to deserialize.
pub(crate) fn merge_params<P: Serialize + DeserializeOwned>(
    module: &'static str,
    current: &P,
    patch: Value,
) -> Result<P> {
    let invalid = |source: serde_json::Error| ModuleError::InvalidParams { module, source };
    let merged = match patch {
        Value::Object(overrides) => {
            let mut base = serde_json::to_value(current).map_err(invalid)?;
            if let Some(fields) = base.as_object_mut() {
                fields.extend(overrides);
            }
            base
        }
        other => other,
    };
    serde_json::from_value(merged).map_err(invalid)
}

/// Borrow a saved document as an object.
pub(crate) fn state_object<'a>(
    module: &'static str,
    state: &'a Value,
) -> Result<&'a serde_json::Map<String, Value>> {
    state
        .as_object()
        .ok_or(ModuleError::MalformedState { module })
}
