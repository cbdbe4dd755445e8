//! Virtual Energy Meter Library
//!
//! Simulates a 3-phase electrical power meter and publishes its readings as
//! fixed-point holding registers over Modbus TCP. A single update loop owns
//! the simulated state and is the only writer of the register store, while
//! the protocol server answers any number of concurrent readers.

pub mod config;
pub mod device_identity;
pub mod error;
pub mod meter_server;
pub mod meter_state;
pub mod modbus_frame;
pub mod power_model;
pub mod profile;
pub mod register_encoder;
pub mod register_store;
pub mod simulation;
pub mod update_loop;

// Re-export commonly used types for easier access
pub use device_identity::DeviceIdentity;
pub use error::MeterError;
pub use meter_server::{MeterService, ProtocolServer, ServerHandle, ServerState};
pub use meter_state::{MeterState, NoiseSpans};
pub use power_model::{derive, DerivedPower, Reading};
pub use profile::Profile;
pub use register_encoder::{encode, RegisterBlock, REGISTER_COUNT};
pub use register_store::{RegisterStore, Snapshot};
pub use simulation::Simulation;
pub use update_loop::UpdateLoop;
