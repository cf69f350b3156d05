//! Fixed 64-slot value tracks.

use std::ops::{Index, IndexMut};

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::range::RangeMapper;

pub const NUM_STEPS: usize = 64;

/// One of the sequence, modulation or slip tracks.
///
/// Tracks are regenerated wholesale and never resized. Values are either
/// normalized randoms in `[0, 1)` or voltages already mapped through a
/// [`RangeMapper`], depending on how they were generated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Track {
    values: [f32; NUM_STEPS],
}

impl Default for Track {
    fn default() -> Self {
        Self {
            values: [0.0; NUM_STEPS],
        }
    }
}

impl Track {
    pub fn values(&self) -> &[f32; NUM_STEPS] {
        &self.values
    }

    pub fn clear(&mut self) {
        self.values = [0.0; NUM_STEPS];
    }

    /// Fill every slot with a fresh uniform random, optionally mapped.
    pub fn randomize<R: Rng>(&mut self, rng: &mut R, mapping: Option<&RangeMapper>) {
        for slot in self.values.iter_mut() {
            let x: f32 = rng.random();
            *slot = mapping.map_or(x, |range| range.map(x));
        }
    }

    /// Number of slots holding a nonzero value.
    pub fn count_nonzero(&self) -> usize {
        self.values.iter().filter(|v| **v != 0.0).count()
    }
}

impl Index<usize> for Track {
    type Output = f32;

    fn index(&self, step: usize) -> &f32 {
        &self.values[step]
    }
}

impl IndexMut<usize> for Track {
    fn index_mut(&mut self, step: usize) -> &mut f32 {
        &mut self.values[step]
    }
}

impl Serialize for Track {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.values[..].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Track {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<f32>::deserialize(deserializer)?;
        let values: [f32; NUM_STEPS] = values.try_into().map_err(|v: Vec<f32>| {
            serde::de::Error::invalid_length(v.len(), &"exactly 64 track values")
        })?;
        Ok(Track { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn randomize_raw_stays_normalized() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut track = Track::default();
        track.randomize(&mut rng, None);
        assert!(track.values().iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn randomize_mapped_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let range = RangeMapper::new(5.0, -5.0);
        let mut track = Track::default();
        track.randomize(&mut rng, Some(&range));
        assert!(track.values().iter().all(|v| (-5.0..=5.0).contains(v)));
        assert!(track.values().iter().any(|v| *v < 0.0));
    }

    #[test]
    fn serde_requires_64_values() {
        let mut track = Track::default();
        track[3] = 0.5;
        let json = serde_json::to_value(track).unwrap();
        assert_eq!(json.as_array().unwrap().len(), NUM_STEPS);
        let back: Track = serde_json::from_value(json).unwrap();
        assert_eq!(back, track);

        let short = serde_json::json!([0.1, 0.2]);
        assert!(serde_json::from_value::<Track>(short).is_err());
    }
}
