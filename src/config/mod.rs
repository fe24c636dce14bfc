//! Configuration management for the WMP driver
//!
//! Configuration is layered: built-in defaults, then an optional file
//! (TOML, JSON or YAML, picked by extension), then `WMP_`-prefixed
//! environment variables.

use crate::error::{Result, WmpError};
use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};
use tracing::warn;

/// Default WMP control port
pub const DEFAULT_PORT: u16 = 3310;

/// Lower bound for the polling period
pub const MIN_SYNC_PERIOD: Duration = Duration::from_millis(1000);

/// Driver configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    /// Device host name or IP address
    pub host: String,

    /// Device control port
    pub port: u16,

    /// Device channel used for GET/SET (always 1 in this deployment)
    pub channel: u8,

    /// Lower setpoint bound pushed to the device on every (re)sync, in °C
    pub min_setpoint: f64,

    /// Upper setpoint bound pushed to the device on every (re)sync, in °C
    pub max_setpoint: f64,

    /// TCP connect budget
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Keepalive PING interval
    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,

    /// Delay between a socket close and the next connect attempt
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,

    /// Budget for the identify response and for a full register dump
    #[serde(with = "humantime_serde")]
    pub identify_timeout: Duration,

    /// Budget for a write acknowledgment
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,

    /// Polling period
    #[serde(with = "humantime_serde")]
    pub sync_period: Duration,

    /// Polls slower than this are logged as a warning
    #[serde(with = "humantime_serde")]
    pub slow_response_threshold: Duration,

    /// Wire function name of the register that closes a full dump
    pub dump_terminator: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            channel: 1,
            min_setpoint: 18.0,
            max_setpoint: 30.0,
            connect_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            identify_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(30),
            sync_period: MIN_SYNC_PERIOD,
            slow_response_threshold: Duration::from_millis(500),
            dump_terminator: "ERRCODE".to_string(),
        }
    }
}

impl DriverConfig {
    /// Create a configuration for the given host with default settings
    pub fn for_host<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&DriverConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: DriverConfig = builder
            .add_source(config::Environment::with_prefix("WMP").try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config.normalized())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = env::var("WMP_HOST") {
            config.host = host;
        }

        if let Ok(port) = env::var("WMP_PORT") {
            config.port = port
                .parse()
                .map_err(|e| WmpError::config(format!("Invalid WMP_PORT: {e}")))?;
        }

        if let Ok(min) = env::var("WMP_MIN_SETPOINT") {
            config.min_setpoint = min
                .parse()
                .map_err(|e| WmpError::config(format!("Invalid WMP_MIN_SETPOINT: {e}")))?;
        }

        if let Ok(max) = env::var("WMP_MAX_SETPOINT") {
            config.max_setpoint = max
                .parse()
                .map_err(|e| WmpError::config(format!("Invalid WMP_MAX_SETPOINT: {e}")))?;
        }

        if let Ok(period) = env::var("WMP_SYNC_PERIOD") {
            config.sync_period = humantime_serde::re::humantime::parse_duration(&period)
                .map_err(|e| WmpError::config(format!("Invalid WMP_SYNC_PERIOD: {e}")))?;
        }

        if let Ok(threshold) = env::var("WMP_SLOW_RESPONSE_THRESHOLD") {
            config.slow_response_threshold =
                humantime_serde::re::humantime::parse_duration(&threshold).map_err(|e| {
                    WmpError::config(format!("Invalid WMP_SLOW_RESPONSE_THRESHOLD: {e}"))
                })?;
        }

        config.validate()?;
        Ok(config.normalized())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(WmpError::config("Host cannot be empty"));
        }

        if self.port == 0 {
            return Err(WmpError::config("Port must be greater than zero"));
        }

        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("keepalive_interval", self.keepalive_interval),
            ("identify_timeout", self.identify_timeout),
            ("ack_timeout", self.ack_timeout),
        ] {
            if value.is_zero() {
                return Err(WmpError::config(format!("{name} must be greater than zero")));
            }
        }

        if self.min_setpoint >= self.max_setpoint {
            return Err(WmpError::config(format!(
                "min_setpoint ({}) must be below max_setpoint ({})",
                self.min_setpoint, self.max_setpoint
            )));
        }

        if self.dump_terminator.is_empty() {
            return Err(WmpError::config("dump_terminator cannot be empty"));
        }

        Ok(())
    }

    /// Apply lower bounds that are corrected rather than rejected
    pub fn normalized(mut self) -> Self {
        if self.sync_period < MIN_SYNC_PERIOD {
            warn!(
                "sync_period {:?} is below the minimum, using {:?}",
                self.sync_period, MIN_SYNC_PERIOD
            );
            self.sync_period = MIN_SYNC_PERIOD;
        }
        self
    }

    /// `host:port` address of the device
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = DriverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 3310);
        assert_eq!(config.slow_response_threshold, Duration::from_millis(500));
        assert_eq!(config.address(), "127.0.0.1:3310");
    }

    #[test]
    fn test_sync_period_is_clamped() {
        let config = DriverConfig {
            sync_period: Duration::from_millis(200),
            ..DriverConfig::default()
        }
        .normalized();
        assert_eq!(config.sync_period, MIN_SYNC_PERIOD);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let config = DriverConfig {
            min_setpoint: 25.0,
            max_setpoint: 20.0,
            ..DriverConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DriverConfig::for_host("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        temp_env::with_vars(
            [
                ("WMP_HOST", Some("10.0.0.42")),
                ("WMP_MIN_SETPOINT", Some("16")),
                ("WMP_SYNC_PERIOD", Some("3s")),
            ],
            || {
                let config = DriverConfig::from_env().unwrap();
                assert_eq!(config.host, "10.0.0.42");
                assert_eq!(config.min_setpoint, 16.0);
                assert_eq!(config.sync_period, Duration::from_secs(3));
            },
        );
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "host = \"192.168.1.50\"\nmax_setpoint = 28.0\nack_timeout = \"10s\""
        )
        .unwrap();

        let config = DriverConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.host, "192.168.1.50");
        assert_eq!(config.max_setpoint, 28.0);
        assert_eq!(config.ack_timeout, Duration::from_secs(10));
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
