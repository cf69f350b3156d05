//! Polyphonic port buffers.
//!
//! A port carries up to 16 independent lanes, like a polyphonic cable in a
//! hardware-style modular host:
//!
//! - `PolyOutput`: lanes written by a module, read by the host
//! - `PolySignal`: lanes written by the host into a module input
//!
//! Both are fixed capacity so the per-sample path never allocates.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;

/// Maximum lanes per port
pub const PORT_MAX_CHANNELS: usize = 16;

/// A polyphonic output buffer with channel count metadata.
///
/// `channels` tells how many lanes are meaningful:
/// - 0 = nothing published
/// - 1 = monophonic
/// - 2-16 = polyphonic
///
/// Lanes above the active count are zeroed when the count shrinks, lanes
/// below it keep whatever was last written.
#[derive(Clone, Copy, Debug)]
pub struct PolyOutput {
    voltages: [f32; PORT_MAX_CHANNELS],
    channels: usize,
}

impl Default for PolyOutput {
    fn default() -> Self {
        Self {
            voltages: [0.0; PORT_MAX_CHANNELS],
            channels: 0,
        }
    }
}

impl PartialEq for PolyOutput {
    fn eq(&self, other: &Self) -> bool {
        self.channels == other.channels
            && self.voltages[..self.channels] == other.voltages[..other.channels]
    }
}

impl PolyOutput {
    pub fn mono(value: f32) -> Self {
        let mut out = Self::default();
        out.voltages[0] = value;
        out.channels = 1;
        out
    }

    /// Voltage on a lane, 0.0 for inactive lanes.
    pub fn get(&self, channel: usize) -> f32 {
        if channel < self.channels {
            self.voltages[channel]
        } else {
            0.0
        }
    }

    pub fn set(&mut self, channel: usize, value: f32) {
        debug_assert!(channel < PORT_MAX_CHANNELS, "lane {channel} out of bounds");
        if channel < PORT_MAX_CHANNELS {
            self.voltages[channel] = value;
        }
    }

    /// Set the number of active lanes (clears lanes that become inactive).
    pub fn set_channels(&mut self, channels: usize) {
        let channels = channels.min(PORT_MAX_CHANNELS);
        for c in channels..self.channels {
            self.voltages[c] = 0.0;
        }
        self.channels = channels;
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Active lanes as a slice.
    pub fn as_slice(&self) -> &[f32] {
        &self.voltages[..self.channels]
    }
}

impl Serialize for PolyOutput {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("PolyOutput", 2)?;
        state.serialize_field("channels", &self.channels)?;
        state.serialize_field("voltages", self.as_slice())?;
        state.end()
    }
}

impl JsonSchema for PolyOutput {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("PolyOutput")
    }

    fn json_schema(r#gen: &mut schemars::SchemaGenerator) -> schemars::Schema {
        #[derive(JsonSchema)]
        #[allow(dead_code)]
        struct PolyOutputSchema {
            channels: usize,
            voltages: Vec<f32>,
        }
        PolyOutputSchema::json_schema(r#gen)
    }
}

// =============================================================================
// PolySignal - voltages patched into a module input
// =============================================================================

/// A polyphonic input buffer.
///
/// `channels == 0` means nothing is patched into the port; modules use that
/// to fall back to their knob value (see [`PolySignal::is_disconnected`]).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PolySignal {
    voltages: [f32; PORT_MAX_CHANNELS],
    channels: usize,
}

impl PolySignal {
    pub fn mono(value: f32) -> Self {
        let mut sig = Self::default();
        sig.voltages[0] = value;
        sig.channels = 1;
        sig
    }

    pub fn poly(values: &[f32]) -> Self {
        let channels = values.len().min(PORT_MAX_CHANNELS);
        let mut sig = Self::default();
        sig.voltages[..channels].copy_from_slice(&values[..channels]);
        sig.channels = channels;
        sig
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_disconnected(&self) -> bool {
        self.channels == 0
    }

    /// Voltage with modulo cycling: a mono signal feeds every lane.
    pub fn get_value(&self, channel: usize) -> f32 {
        if self.channels == 0 {
            0.0
        } else {
            self.voltages[channel % self.channels]
        }
    }

}

impl From<PolyOutput> for PolySignal {
    fn from(out: PolyOutput) -> Self {
        PolySignal::poly(out.as_slice())
    }
}

impl<'de> Deserialize<'de> for PolySignal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Accept either a bare number or an array of lane voltages
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum PolySignalDe {
            Single(f32),
            Array(Vec<f32>),
        }

        Ok(match PolySignalDe::deserialize(deserializer)? {
            PolySignalDe::Single(v) => PolySignal::mono(v),
            PolySignalDe::Array(values) => PolySignal::poly(&values),
        })
    }
}
