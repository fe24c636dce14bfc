//! Test fixtures for consistent test setup
//!
//! Provides driver configurations tuned for fast tests, plus rstest fixtures
//! for tests that do not need a real socket.

use intesis_wmp::DriverConfig;
use rstest::*;
use std::time::Duration;

/// Configuration pointing at a local fake gateway
pub fn test_config(port: u16) -> DriverConfig {
    DriverConfig {
        port,
        connect_timeout: Duration::from_secs(2),
        reconnect_delay: Duration::from_millis(200),
        identify_timeout: Duration::from_secs(2),
        ack_timeout: Duration::from_secs(2),
        ..DriverConfig::for_host("127.0.0.1")
    }
}

/// Default driver configuration, for in-memory transports
#[fixture]
pub fn driver_config() -> DriverConfig {
    DriverConfig::for_host("wmp.test")
}

/// Register dump of an idle unit in cooling mode
pub fn cooling_registers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("ONOFF", "ON"),
        ("MODE", "COOL"),
        ("FANSP", "2"),
        ("VANEUD", "SWING"),
        ("SETPTEMP", "215"),
        ("AMBTEMP", "32768"),
        ("LOCK", "OFF"),
        ("SETPTEMPMIN", "180"),
        ("SETPTEMPMAX", "300"),
        ("OUTTEMP", "-15"),
    ]
}

/// Upper bound for anything that should happen "soon" over loopback TCP
pub const SOON: Duration = Duration::from_secs(5);
