//! Slips sequencer core library
//!
//! This crate provides the Slips random step sequencer, its Slipspander
//! scale expander and the quantizer they share, plus a small rack host model
//! that ticks modules sample by sample. It is a pure library with no audio
//! or file I/O; the `slips_cli` binaries drive it.

pub mod dsp;
pub mod error;
pub mod poly;
pub mod rack;
pub mod types;

// Re-export commonly used items
pub use dsp::seq::range::RangeMapper;
pub use dsp::seq::scale::{BuiltinScale, CustomScale, Scale, quantize};
pub use dsp::seq::slips::{Slips, SlipsParams};
pub use dsp::seq::slipspander::Slipspander;
pub use error::{ModuleError, ScaleError};
pub use poly::{PORT_MAX_CHANNELS, PolyOutput, PolySignal};
pub use rack::{Rack, RackState, SlotState};

pub use types::{
    Expanders, Module, ModuleConstructor, ModuleConstructorMap, ModuleSchema, ProcessArgs,
    ScaleProvider,
};
