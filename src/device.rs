//! Device facade for presentation layers
//!
//! [`IntesisDevice`] bundles the shared transport and the state synchronizer
//! behind typed getters and setters. Getters read the last polled snapshot and
//! never block. Setters go through the command queue and resolve with the
//! write's [`CommandResult`].

use crate::client::correlator::{self, PendingEvent};
use crate::client::message::{Identity, WmpCommand};
use crate::client::{CommandResult, TransportRegistry, WmpTransport};
use crate::config::DriverConfig;
use crate::error::{Result, WmpError};
use crate::services::{Attribute, StateChangeEvent, StateManager, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// One Intesis WMP gateway
pub struct IntesisDevice {
    transport: Arc<dyn WmpTransport>,
    manager: Arc<StateManager>,
    config: DriverConfig,
}

impl IntesisDevice {
    /// Build a device over an existing transport
    pub fn new(transport: Arc<dyn WmpTransport>, config: DriverConfig) -> Self {
        let manager = Arc::new(StateManager::new(Arc::clone(&transport), config.clone()));
        Self {
            transport,
            manager,
            config,
        }
    }

    /// Build a device over the registry's transport for `config.host`
    pub fn connect(registry: &TransportRegistry, config: DriverConfig) -> Self {
        let transport: Arc<dyn WmpTransport> = registry.get_or_start(&config);
        Self::new(transport, config)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.manager
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.manager.subscribe()
    }

    /// Copy of every known attribute value
    pub fn snapshot(&self) -> BTreeMap<Attribute, Value> {
        self.manager.snapshot()
    }

    pub fn start_synchronization(&self) {
        self.manager.start_synchronization();
    }

    pub fn stop_synchronization(&self) {
        self.manager.stop_synchronization();
    }

    /// Poll every register once
    pub async fn refresh_state(&self) -> Result<()> {
        self.manager.refresh_state().await
    }

    /// Device identity, waiting for the identify response if none is cached
    pub async fn get_info(&self) -> Result<Identity> {
        let pending = PendingEvent::arm(
            self.transport.as_ref(),
            "identify response",
            self.config.identify_timeout,
            correlator::identify,
        );

        if let Some(identity) = self.transport.identity() {
            return Ok(identity);
        }

        if self.transport.is_connected() {
            if let Err(e) = self.transport.send(WmpCommand::Id).await {
                debug!("Identify request not sent: {}", e);
            }
        }

        let payload = pending.wait().await?;
        Identity::parse(&payload)
            .ok_or_else(|| WmpError::protocol(format!("malformed identify payload: {payload:?}")))
    }

    // Getters

    pub fn active(&self) -> Option<bool> {
        self.value(Attribute::Active).and_then(|v| v.as_bool())
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.number(Attribute::CurrentTemperature)
    }

    pub fn fan_speed(&self) -> Option<String> {
        self.text(Attribute::FanSpeed)
    }

    pub fn locked(&self) -> Option<bool> {
        self.value(Attribute::Locked).and_then(|v| v.as_bool())
    }

    pub fn max_setpoint(&self) -> Option<f64> {
        self.number(Attribute::MaxSetpoint)
    }

    pub fn min_setpoint(&self) -> Option<f64> {
        self.number(Attribute::MinSetpoint)
    }

    pub fn mode(&self) -> Option<String> {
        self.text(Attribute::Mode)
    }

    pub fn outdoor_temperature(&self) -> Option<f64> {
        self.number(Attribute::OutdoorTemperature)
    }

    pub fn setpoint(&self) -> Option<f64> {
        self.number(Attribute::Setpoint)
    }

    pub fn swing_mode(&self) -> Option<String> {
        self.text(Attribute::SwingMode)
    }

    /// Whether a full poll has populated the state
    pub fn valid(&self) -> bool {
        self.manager.is_valid()
    }

    pub fn value(&self, attribute: Attribute) -> Option<Value> {
        self.manager.get(attribute)
    }

    fn number(&self, attribute: Attribute) -> Option<f64> {
        self.value(attribute).and_then(|v| v.as_f64())
    }

    fn text(&self, attribute: Attribute) -> Option<String> {
        self.value(attribute)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    // Setters

    pub async fn set_active(&self, on: bool) -> Result<CommandResult> {
        self.manager.set(Attribute::Active, Value::Bool(on)).await
    }

    pub async fn set_fan_speed(&self, speed: &str) -> Result<CommandResult> {
        self.manager.set(Attribute::FanSpeed, Value::from(speed)).await
    }

    pub async fn set_locked(&self, locked: bool) -> Result<CommandResult> {
        self.manager.set(Attribute::Locked, Value::Bool(locked)).await
    }

    pub async fn set_max_setpoint(&self, celsius: f64) -> Result<CommandResult> {
        self.manager.set(Attribute::MaxSetpoint, Value::Number(celsius)).await
    }

    pub async fn set_min_setpoint(&self, celsius: f64) -> Result<CommandResult> {
        self.manager.set(Attribute::MinSetpoint, Value::Number(celsius)).await
    }

    pub async fn set_mode(&self, mode: &str) -> Result<CommandResult> {
        self.manager.set(Attribute::Mode, Value::from(mode)).await
    }

    pub async fn set_setpoint(&self, celsius: f64) -> Result<CommandResult> {
        self.manager.set(Attribute::Setpoint, Value::Number(celsius)).await
    }

    pub async fn set_swing_mode(&self, position: &str) -> Result<CommandResult> {
        self.manager.set(Attribute::SwingMode, Value::from(position)).await
    }

    /// Write an attribute by name; unknown names are logged and ignored
    pub async fn set(&self, name: &str, value: Value) -> Result<Option<CommandResult>> {
        self.manager.set_by_name(name, value).await
    }

    /// Parse `input` for the named attribute and write it
    pub async fn set_from_str(&self, name: &str, input: &str) -> Result<CommandResult> {
        let attribute: Attribute = name.parse()?;
        let transform = self
            .manager
            .codec()
            .transform(attribute)
            .ok_or_else(|| WmpError::encoding(format!("{attribute} cannot be written")))?;
        let value = transform.parse_input(input)?;
        self.manager.set(attribute, value).await
    }
}

impl Drop for IntesisDevice {
    fn drop(&mut self) {
        self.manager.stop_synchronization();
    }
}
