use crate::meter_state::MeterState;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Load shape applied on top of the random walk by a presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Profile {
    /// Low currents, good power factor
    Light,
    /// High currents, slightly lower power factor
    #[default]
    Industrial,
    /// Currents and power factor redrawn at random on every application
    RandomTest,
}

impl Profile {
    pub const ALL: [Profile; 3] = [Profile::Light, Profile::Industrial, Profile::RandomTest];

    pub fn label(&self) -> &'static str {
        match self {
            Profile::Light => "Light / Office",
            Profile::Industrial => "Industrial / Heavy",
            Profile::RandomTest => "Random test",
        }
    }

    /// Rescales the current and power factor of `state` in place
    pub fn apply<R: Rng + ?Sized>(&self, state: &mut MeterState, rng: &mut R) {
        match self {
            Profile::Light => {
                for current in state.current.iter_mut() {
                    *current = (*current * 0.5).max(1.0);
                }
                state.power_factor = state.power_factor.max(0.95).min(0.99);
            }
            Profile::Industrial => {
                for current in state.current.iter_mut() {
                    *current = (*current * 1.5 + 5.0).min(80.0);
                }
                state.power_factor = state.power_factor.min(0.96).max(0.85);
            }
            Profile::RandomTest => {
                for current in state.current.iter_mut() {
                    *current = rng.gen_range(0.0..=100.0);
                }
                state.power_factor = rng.gen_range(0.75..=0.99);
            }
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown profile `{0}`")]
pub struct UnknownProfile(pub String);

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" | "light / office" => Ok(Profile::Light),
            "industrial" | "industrial / heavy" => Ok(Profile::Industrial),
            "random" | "random-test" | "randomtest" | "random test" => Ok(Profile::RandomTest),
            _ => Err(UnknownProfile(s.to_string())),
        }
    }
}
