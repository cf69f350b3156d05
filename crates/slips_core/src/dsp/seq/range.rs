//! Voltage range mapping for the sequence, modulation and slip tracks.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ModuleError;

/// Endpoints as they are persisted. `low`/`span` are always re-derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RangeEndpoints {
    pub a: f32,
    pub b: f32,
}

/// Maps normalized track values in `[0, 1]` onto a voltage range.
///
/// Either endpoint may be the larger one. A zero-span range maps every
/// value to its single voltage, and its inverse returns 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RangeEndpoints", into = "RangeEndpoints")]
pub struct RangeMapper {
    a: f32,
    b: f32,
    low: f32,
    span: f32,
}

impl RangeMapper {
    /// Presets offered to users, as `(a, b)` pairs.
    pub const PRESETS: [(f32, f32); 10] = [
        (0.0, 1.0),
        (0.0, 2.0),
        (0.0, 3.0),
        (0.0, 5.0),
        (0.0, 10.0),
        (-1.0, 1.0),
        (-2.0, 2.0),
        (-3.0, 3.0),
        (-5.0, 5.0),
        (-10.0, 10.0),
    ];

    pub fn new(a: f32, b: f32) -> Self {
        Self {
            a,
            b,
            low: a.min(b),
            span: (a - b).abs(),
        }
    }

    pub fn endpoints(&self) -> RangeEndpoints {
        RangeEndpoints {
            a: self.a,
            b: self.b,
        }
    }

    pub fn low(&self) -> f32 {
        self.low
    }

    pub fn span(&self) -> f32 {
        self.span
    }

    pub fn map(&self, x: f32) -> f32 {
        self.low + self.span * x
    }

    pub fn inv_map(&self, v: f32) -> f32 {
        if self.span < f32::EPSILON {
            return 0.0;
        }
        (v - self.low) / self.span
    }
}

impl From<RangeEndpoints> for RangeMapper {
    fn from(e: RangeEndpoints) -> Self {
        RangeMapper::new(e.a, e.b)
    }
}

impl From<RangeMapper> for RangeEndpoints {
    fn from(r: RangeMapper) -> Self {
        r.endpoints()
    }
}

impl JsonSchema for RangeMapper {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("RangeMapper")
    }

    fn json_schema(r#gen: &mut schemars::SchemaGenerator) -> schemars::Schema {
        RangeEndpoints::json_schema(r#gen)
    }
}

impl fmt::Display for RangeMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.a, self.b)
    }
}

/// Parses labels like `"-5..5"` or `"0..10"`.
impl FromStr for RangeMapper {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ModuleError::InvalidRange(s.to_string());
        let (a, b) = s.trim().split_once("..").ok_or_else(invalid)?;
        let a: f32 = a.trim().parse().map_err(|_| invalid())?;
        let b: f32 = b.trim().parse().map_err(|_| invalid())?;
        if !a.is_finite() || !b.is_finite() {
            return Err(invalid());
        }
        Ok(RangeMapper::new(a, b))
    }
}
