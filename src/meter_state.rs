use rand::Rng;
use serde::{Deserialize, Serialize};

pub const NOMINAL_VOLTAGE: f64 = 230.0;
pub const NOMINAL_FREQUENCY: f64 = 50.0;
pub const MIN_POWER_FACTOR: f64 = 0.7;
pub const MAX_POWER_FACTOR: f64 = 1.0;

/// Jitter spans applied on every tick. Each field is the half width of the
/// uniform distribution added to the matching quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseSpans {
    pub voltage: f64,
    pub current: f64,
    pub power_factor: f64,
    pub frequency: f64,
}

impl NoiseSpans {
    /// No jitter at all, a tick only enforces the clamps
    pub fn silent() -> Self {
        Self {
            voltage: 0.0,
            current: 0.0,
            power_factor: 0.0,
            frequency: 0.0,
        }
    }
}

impl Default for NoiseSpans {
    fn default() -> Self {
        Self {
            voltage: 1.0,
            current: 0.2,
            power_factor: 0.01,
            frequency: 0.02,
        }
    }
}

/// Instantaneous electrical condition of one simulated 3-phase meter.
///
/// Current is never negative and the power factor stays within
/// [`MIN_POWER_FACTOR`, `MAX_POWER_FACTOR`] after every tick. Voltage and
/// frequency drift freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterState {
    pub voltage: [f64; 3],
    pub current: [f64; 3],
    pub power_factor: f64,
    pub frequency: f64,
}

impl Default for MeterState {
    fn default() -> Self {
        Self {
            voltage: [NOMINAL_VOLTAGE; 3],
            current: [10.0, 8.0, 12.0],
            power_factor: 0.96,
            frequency: NOMINAL_FREQUENCY,
        }
    }
}

impl MeterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the state one step with the default noise and a thread-local RNG
    pub fn tick(&mut self) {
        self.tick_with(&mut rand::thread_rng(), &NoiseSpans::default());
    }

    /// Advances the state one step: a bounded random walk on every field,
    /// followed by the current and power factor clamps.
    pub fn tick_with<R: Rng + ?Sized>(&mut self, rng: &mut R, noise: &NoiseSpans) {
        for voltage in self.voltage.iter_mut() {
            *voltage = jitter(rng, *voltage, noise.voltage);
        }
        for current in self.current.iter_mut() {
            *current = jitter(rng, *current, noise.current).max(0.0);
        }
        self.power_factor = jitter(rng, self.power_factor, noise.power_factor)
            .clamp(MIN_POWER_FACTOR, MAX_POWER_FACTOR);
        self.frequency = jitter(rng, self.frequency, noise.frequency);
    }
}

fn jitter<R: Rng + ?Sized>(rng: &mut R, value: f64, span: f64) -> f64 {
    if span > 0.0 {
        value + rng.gen_range(-span..=span)
    } else {
        value
    }
}
