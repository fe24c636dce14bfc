//! Device services
//!
//! Register decoding and encoding, and the state synchronizer built on top of
//! the client layer.

pub mod sensor_registry;
pub mod state_manager;
pub mod value_parsers;

pub use sensor_registry::{Attribute, Decoded, SensorCodec, SensorDescriptor, SetpointLimits};
pub use state_manager::{DeviceState, StateChangeEvent, StateManager, SyncPhase};
pub use value_parsers::{Transform, Value};
