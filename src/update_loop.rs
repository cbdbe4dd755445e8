use crate::{
    error::MeterError,
    meter_state::{MeterState, NoiseSpans},
    power_model::{derive, Reading},
    register_encoder::encode,
    register_store::RegisterStore,
};
use rand::{rngs::StdRng, SeedableRng};
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Sole writer of a [`RegisterStore`]: owns the simulated state and
/// republishes its encoding once per period.
pub struct UpdateLoop {
    state: MeterState,
    store: RegisterStore,
    period: Duration,
    noise: NoiseSpans,
    rng: StdRng,
}

impl UpdateLoop {
    pub fn new(state: MeterState, store: RegisterStore, period: Duration) -> Self {
        Self {
            state,
            store,
            period,
            noise: NoiseSpans::default(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_noise(mut self, noise: NoiseSpans) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> &MeterState {
        &self.state
    }

    /// Runs one tick: advance, derive, encode, publish
    pub fn step(&mut self) -> Result<u64, MeterError> {
        self.state.tick_with(&mut self.rng, &self.noise);
        let power = derive(&self.state);
        let block = encode(&self.state, &power);
        let generation = self.store.write_all(block)?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let reading = Reading {
                state: self.state.clone(),
                power,
            };
            match serde_json::to_string(&reading) {
                Ok(json) => debug!(generation, reading = %json, "published registers"),
                Err(e) => debug!(generation, "published registers ({e})"),
            }
        }
        Ok(generation)
    }

    /// Ticks forever, one step per period. A slow step delays the following
    /// ones instead of triggering a burst of catch-up ticks.
    pub async fn run(mut self) {
        info!(period = ?self.period, "starting register update loop");
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.step() {
                warn!("register update failed, keeping last published values: {e}");
            }
        }
    }

    /// Spawns [`UpdateLoop::run`] on the current tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
