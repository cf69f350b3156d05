//! Error types for the non-realtime surface of the crate.
//!
//! Nothing on the per-sample path returns these. Out-of-range voltages are
//! clamped; these errors only come from params, ports addressed by name,
//! saved documents and scale construction.

use thiserror::Error;

/// Rejected custom scale definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScaleError {
    #[error("custom scale must contain at least one note")]
    Empty,
    #[error("semitone offset {0} is outside 0..12")]
    OutOfRange(u8),
    #[error("semitone offset {0} appears more than once")]
    Duplicate(u8),
    #[error("unknown scale name: {0}")]
    UnknownName(String),
    #[error("'{0}' is not a semitone offset")]
    InvalidNote(String),
}

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module '{module}' has no input port '{port}'")]
    UnknownInput { module: &'static str, port: String },
    #[error("module '{module}' has no output port '{port}'")]
    UnknownOutput { module: &'static str, port: String },
    #[error("invalid params for '{module}': {source}")]
    InvalidParams {
        module: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("saved state for '{module}' must be a JSON object")]
    MalformedState { module: &'static str },
    #[error("invalid range '{0}', expected '<low>..<high>'")]
    InvalidRange(String),
    #[error("rack slot {slot} is out of bounds (rack has {len} slots)")]
    SlotOutOfBounds { slot: usize, len: usize },
    #[error("rack slot {0} is already occupied")]
    SlotOccupied(usize),
    #[error("rack slot {0} is empty")]
    EmptySlot(usize),
    #[error("unknown module type: {0}")]
    UnknownModuleType(String),
}

pub type Result<T> = std::result::Result<T, ModuleError>;
