use crate::meter_state::MeterState;
use serde::{Deserialize, Serialize};

/// Active power in kW, derived from one [`MeterState`].
///
/// Every phase uses the same power factor and the reactive part is ignored,
/// so this is only an approximation of a real 3-phase measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedPower {
    pub phase: [f64; 3],
    pub total: f64,
}

/// A state together with the power derived from it, as shown to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(flatten)]
    pub state: MeterState,
    pub power: DerivedPower,
}

impl Reading {
    pub fn of(state: &MeterState) -> Self {
        Self {
            state: state.clone(),
            power: derive(state),
        }
    }
}

/// `P = V * I * pf / 1000` per phase, summed for the total
pub fn derive(state: &MeterState) -> DerivedPower {
    let mut phase = [0.0; 3];
    for (i, p) in phase.iter_mut().enumerate() {
        *p = state.voltage[i] * state.current[i] * state.power_factor / 1000.0;
    }
    DerivedPower {
        phase,
        total: phase[0] + phase[1] + phase[2],
    }
}
