//! Scale tables and nearest-note quantization.
//!
//! Pitches are V/Oct: 1.0 is one octave, 1/12 a semitone. A scale is either
//! one of the builtin interval sets or a custom ordered list of semitone
//! offsets (usually coming from the Slipspander expander).

use arrayvec::ArrayVec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ScaleError;

/// The builtin scales, in selector order (scale knob 0..=10).
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub enum BuiltinScale {
    Chromatic,
    #[default]
    Major,
    Minor,
    MajorPentatonic,
    MinorPentatonic,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    Blues,
}

impl BuiltinScale {
    pub const ALL: [BuiltinScale; 11] = [
        BuiltinScale::Chromatic,
        BuiltinScale::Major,
        BuiltinScale::Minor,
        BuiltinScale::MajorPentatonic,
        BuiltinScale::MinorPentatonic,
        BuiltinScale::Dorian,
        BuiltinScale::Phrygian,
        BuiltinScale::Lydian,
        BuiltinScale::Mixolydian,
        BuiltinScale::Locrian,
        BuiltinScale::Blues,
    ];

    /// Semitone offsets from the root, ascending.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            BuiltinScale::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
            BuiltinScale::Major => &[0, 2, 4, 5, 7, 9, 11],
            BuiltinScale::Minor => &[0, 2, 3, 5, 7, 8, 10],
            BuiltinScale::MajorPentatonic => &[0, 2, 4, 7, 9],
            BuiltinScale::MinorPentatonic => &[0, 3, 5, 7, 10],
            BuiltinScale::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            BuiltinScale::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            BuiltinScale::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            BuiltinScale::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            BuiltinScale::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            BuiltinScale::Blues => &[0, 3, 5, 6, 7, 10],
        }
    }

    /// Scale for a selector index; out-of-range indices clamp to the ends.
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index.min(Self::ALL.len() - 1)]
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinScale::Chromatic => "chromatic",
            BuiltinScale::Major => "major",
            BuiltinScale::Minor => "minor",
            BuiltinScale::MajorPentatonic => "majorPentatonic",
            BuiltinScale::MinorPentatonic => "minorPentatonic",
            BuiltinScale::Dorian => "dorian",
            BuiltinScale::Phrygian => "phrygian",
            BuiltinScale::Lydian => "lydian",
            BuiltinScale::Mixolydian => "mixolydian",
            BuiltinScale::Locrian => "locrian",
            BuiltinScale::Blues => "blues",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn parse(name: &str) -> Result<Self, ScaleError> {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| ScaleError::UnknownName(name.to_string()))
    }
}

/// A non-empty ordered set of semitone offsets (0..12).
///
/// Quantization walks the offsets in this order, so order decides ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomScale {
    notes: ArrayVec<u8, 12>,
}

impl CustomScale {
    pub fn new(notes: &[u8]) -> Result<Self, ScaleError> {
        if notes.is_empty() {
            return Err(ScaleError::Empty);
        }
        let mut out = ArrayVec::new();
        for &note in notes {
            if note >= 12 {
                return Err(ScaleError::OutOfRange(note));
            }
            if out.contains(&note) {
                return Err(ScaleError::Duplicate(note));
            }
            out.push(note);
        }
        Ok(Self { notes: out })
    }

    pub fn notes(&self) -> &[u8] {
        &self.notes
    }

    /// Parse a comma or space separated list such as `"0, 3, 7"`.
    pub fn parse(source: &str) -> Result<Self, ScaleError> {
        let mut notes = Vec::new();
        for part in source
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
        {
            let note: u8 = part
                .parse()
                .map_err(|_| ScaleError::InvalidNote(part.to_string()))?;
            notes.push(note);
        }
        Self::new(&notes)
    }
}

/// Either a builtin scale or a custom note list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scale {
    Builtin(BuiltinScale),
    Custom(CustomScale),
}

impl Scale {
    pub fn intervals(&self) -> &[u8] {
        match self {
            Scale::Builtin(builtin) => builtin.intervals(),
            Scale::Custom(custom) => custom.notes(),
        }
    }
}

impl From<BuiltinScale> for Scale {
    fn from(scale: BuiltinScale) -> Self {
        Scale::Builtin(scale)
    }
}

/// Snap `value` (V/Oct) to the nearest member of `intervals` transposed to `root`.
///
/// Only the position inside the octave is compared: candidates are
/// `((m + root) % 12) / 12` and the octave `floor(value)` is added back.
/// The first candidate with the smallest distance wins, so ties resolve in
/// `intervals` order.
pub fn quantize_intervals(value: f32, root: u8, intervals: &[u8]) -> f32 {
    assert!(!intervals.is_empty(), "cannot quantize to an empty scale");
    let octave = value.floor();
    let fraction = value - octave;

    let mut best = 0.0;
    let mut best_distance = f32::INFINITY;
    for &member in intervals {
        let candidate = ((member as u32 + root as u32) % 12) as f32 / 12.0;
        let distance = (candidate - fraction).abs();
        if distance < best_distance {
            best_distance = distance;
            best = candidate;
        }
    }
    best + octave
}

pub fn quantize(value: f32, root: u8, scale: &Scale) -> f32 {
    quantize_intervals(value, root, scale.intervals())
}
