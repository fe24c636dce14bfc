//! Common test utilities

#![allow(dead_code)]

pub mod test_fixtures;
pub mod wmp_device;

pub use wmp_device::FakeWmpDevice;
