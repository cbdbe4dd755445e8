use crate::{
    meter_state::{MeterState, NoiseSpans},
    power_model::Reading,
    profile::Profile,
};
use rand::{rngs::StdRng, SeedableRng};

/// Independent simulated meter for a presentation layer.
///
/// Owns its own [`MeterState`] and never touches a register store, so a
/// dashboard can pause it, switch profiles or silence the noise without
/// affecting what network clients read.
pub struct Simulation {
    state: MeterState,
    profile: Profile,
    noise: NoiseSpans,
    noise_enabled: bool,
    running: bool,
    rng: StdRng,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn new() -> Self {
        Self {
            state: MeterState::new(),
            profile: Profile::default(),
            noise: NoiseSpans::default(),
            noise_enabled: true,
            running: true,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> &MeterState {
        &self.state
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn set_profile(&mut self, profile: Profile) {
        self.profile = profile;
    }

    pub fn noise_enabled(&self) -> bool {
        self.noise_enabled
    }

    pub fn set_noise_enabled(&mut self, enabled: bool) {
        self.noise_enabled = enabled;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Pauses a running simulation or resumes a paused one
    pub fn toggle_running(&mut self) -> bool {
        self.running = !self.running;
        self.running
    }

    /// One dashboard refresh. Returns `None` while paused.
    pub fn update(&mut self) -> Option<Reading> {
        if !self.running {
            return None;
        }
        if self.noise_enabled {
            self.state.tick_with(&mut self.rng, &self.noise);
        }
        self.profile.apply(&mut self.state, &mut self.rng);
        Some(Reading::of(&self.state))
    }
}
