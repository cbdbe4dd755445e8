//! Fixed-point holding register map of the simulated meter.
//!
//! | Address       | Index | Field                  | Scale |
//! |---------------|-------|------------------------|-------|
//! | 40001 - 40003 | 0 - 2 | voltage L1, L2, L3 (V) | x10   |
//! | 40004 - 40006 | 3 - 5 | current L1, L2, L3 (A) | x100  |
//! | 40007 - 40009 | 6 - 8 | power L1, L2, L3 (kW)  | x100  |
//! | 40010         | 9     | total power (kW)       | x100  |
//! | 40011         | 10    | power factor           | x1000 |
//! | 40012         | 11    | frequency (Hz)         | x100  |
//!
//! Scaled values are truncated toward zero, never rounded. Anything outside
//! the 16 bit range wraps with two's complement semantics, so a negative
//! reading shows up as its two's complement register value.

use crate::{meter_state::MeterState, power_model::DerivedPower};

pub const REGISTER_COUNT: usize = 12;
/// Protocol address of internal index 0
pub const BASE_ADDRESS: u32 = 40001;

pub const VOLTAGE_L1: usize = 0;
pub const CURRENT_L1: usize = 3;
pub const POWER_L1: usize = 6;
pub const POWER_TOTAL: usize = 9;
pub const POWER_FACTOR: usize = 10;
pub const FREQUENCY: usize = 11;

pub const VOLTAGE_SCALE: f64 = 10.0;
pub const CURRENT_SCALE: f64 = 100.0;
pub const POWER_SCALE: f64 = 100.0;
pub const POWER_FACTOR_SCALE: f64 = 1000.0;
pub const FREQUENCY_SCALE: f64 = 100.0;

/// One complete publication of the register map
pub type RegisterBlock = [u16; REGISTER_COUNT];

/// Scale factor of the register at internal `index`
pub fn scale_of(index: usize) -> Option<f64> {
    match index {
        0..=2 => Some(VOLTAGE_SCALE),
        3..=5 => Some(CURRENT_SCALE),
        6..=9 => Some(POWER_SCALE),
        10 => Some(POWER_FACTOR_SCALE),
        11 => Some(FREQUENCY_SCALE),
        _ => None,
    }
}

/// Multiplies by `scale`, truncates toward zero and wraps into 16 bits
pub fn to_register(value: f64, scale: f64) -> u16 {
    (value * scale) as i64 as u16
}

/// Reads a register back as a signed fixed-point value
pub fn from_register(raw: u16, scale: f64) -> f64 {
    raw as i16 as f64 / scale
}

pub fn encode(state: &MeterState, power: &DerivedPower) -> RegisterBlock {
    let mut block = [0u16; REGISTER_COUNT];
    for phase in 0..3 {
        block[VOLTAGE_L1 + phase] = to_register(state.voltage[phase], VOLTAGE_SCALE);
        block[CURRENT_L1 + phase] = to_register(state.current[phase], CURRENT_SCALE);
        block[POWER_L1 + phase] = to_register(power.phase[phase], POWER_SCALE);
    }
    block[POWER_TOTAL] = to_register(power.total, POWER_SCALE);
    block[POWER_FACTOR] = to_register(state.power_factor, POWER_FACTOR_SCALE);
    block[FREQUENCY] = to_register(state.frequency, FREQUENCY_SCALE);
    block
}
