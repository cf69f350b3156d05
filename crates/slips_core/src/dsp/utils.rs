/// Clock and trigger inputs go high above this voltage...
pub const TRIGGER_HIGH_THRESHOLD: f32 = 2.0;
/// ...and low again below this one.
pub const TRIGGER_LOW_THRESHOLD: f32 = 0.1;

/// Map a value from one range to another. If the input range is degenerate, returns `y0`.
pub fn map_range(x: f32, x0: f32, x1: f32, y0: f32, y1: f32) -> f32 {
    let denom = x1 - x0;
    if denom.abs() < f32::EPSILON {
        return y0;
    }
    (x - x0) * (y1 - y0) / denom + y0
}

/// Clamp a control voltage to the 0..10V selector band and rescale it to `lo..=hi`.
pub fn cv_to_range(cv: f32, lo: f32, hi: f32) -> f32 {
    map_range(cv.clamp(0.0, 10.0), 0.0, 10.0, lo, hi)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchmittState {
    Low,
    High,
    Uninitialized,
}

/// Reusable Schmitt trigger with hysteresis
#[derive(Debug, Clone, Copy)]
pub struct SchmittTrigger {
    pub state: SchmittState,
    low_threshold: f32,
    high_threshold: f32,
}

impl SchmittTrigger {
    /// Create a new Schmitt trigger with the given thresholds
    pub fn new(low_threshold: f32, high_threshold: f32) -> Self {
        Self {
            state: SchmittState::Uninitialized,
            low_threshold,
            high_threshold,
        }
    }

    /// Process a sample through the Schmitt trigger
    /// Returns true if it toggled from low to high
    pub fn process(&mut self, input: f32) -> bool {
        match self.state {
            SchmittState::Uninitialized => {
                // First sample only establishes the state, it never fires
                if input > self.high_threshold {
                    self.state = SchmittState::High;
                } else {
                    self.state = SchmittState::Low;
                }
            }
            SchmittState::High => {
                if input < self.low_threshold {
                    self.state = SchmittState::Low;
                }
            }
            SchmittState::Low => {
                if input > self.high_threshold {
                    self.state = SchmittState::High;
                    return true;
                }
            }
        }

        false
    }
}

impl Default for SchmittTrigger {
    fn default() -> Self {
        Self::new(TRIGGER_LOW_THRESHOLD, TRIGGER_HIGH_THRESHOLD)
    }
}

/// Fixed-width pulse measured in seconds of processed time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PulseGenerator {
    remaining: f32,
}

impl PulseGenerator {
    /// Start (or restart) a pulse of `duration` seconds.
    pub fn trigger(&mut self, duration: f32) {
        if duration > self.remaining {
            self.remaining = duration;
        }
    }

    /// Advance by `delta_time` seconds. Returns whether the pulse is still high.
    pub fn process(&mut self, delta_time: f32) -> bool {
        if self.remaining > 0.0 {
            self.remaining -= delta_time;
            true
        } else {
            false
        }
    }
}
