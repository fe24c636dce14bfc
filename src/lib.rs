//! Async driver for HVAC gateways speaking the Intesis WMP line protocol
//!
//! The driver keeps one long-lived TCP connection per gateway, polls the full
//! register set on a fixed period, translates raw registers into normalized
//! attributes and serializes writes so that only one command awaits its
//! acknowledgment at a time.
//!
//! # Features
//!
//! - Reconnecting line transport with keepalive and identify on connect
//! - Typed wire messages and a CRLF line codec
//! - Sensor codec with paired setpoint-limit encoding
//! - Polling state synchronizer with per-attribute change notifications
//! - FIFO command queue with acknowledgment timeouts

// Core modules
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod services;

// Test support modules - available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-export main types for convenience
pub use client::{TcpTransport, TransportEvent, TransportRegistry, WmpTransport};
pub use config::DriverConfig;
pub use device::IntesisDevice;
pub use error::{Result, WmpError};
pub use services::{Attribute, StateChangeEvent, Value};
