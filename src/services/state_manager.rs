//! State synchronizer
//!
//! The [`StateManager`] owns the device state snapshot. A poll sends
//! `GET,<channel>:*`, decodes every channel update until the dump terminator
//! arrives, merges the result into the current state and reports what changed
//! since the previous generation.
//!
//! Per-attribute change events of one poll are always published before that
//! poll's [`StateChangeEvent::Updated`].

use crate::client::correlator::PendingEvent;
use crate::client::message::{WmpEvent, ALL_REGISTERS};
use crate::client::{CommandQueue, CommandResult, WmpTransport};
use crate::config::{DriverConfig, MIN_SYNC_PERIOD};
use crate::error::Result;
use crate::services::sensor_registry::{Attribute, Decoded, SensorCodec, SetpointLimits};
use crate::services::value_parsers::Value;
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the change notification channel
pub const STATE_EVENT_CAPACITY: usize = 256;

/// Synchronizer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    /// No poll attempted yet
    Uninitialized,
    /// First cycle after start or reset is running
    Syncing,
    /// At least one full poll populated the state
    Synced,
    /// The last cycle failed; state was cleared
    Reset,
}

/// Change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateChangeEvent {
    /// One attribute changed value
    Changed {
        attribute: Attribute,
        old: Option<Value>,
        new: Value,
    },
    /// At least one attribute changed in the last poll
    Updated,
}

/// Current and previous state generations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    current: BTreeMap<Attribute, Value>,
    previous: BTreeMap<Attribute, Value>,
}

impl DeviceState {
    pub fn get(&self, attribute: Attribute) -> Option<&Value> {
        self.current.get(&attribute)
    }

    pub fn set(&mut self, attribute: Attribute, value: Value) {
        self.current.insert(attribute, value);
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Copy of the current generation
    pub fn snapshot(&self) -> BTreeMap<Attribute, Value> {
        self.current.clone()
    }

    /// Drop both generations
    pub fn clear(&mut self) {
        self.current.clear();
        self.previous.clear();
    }

    /// Collect changes between the generations, promoting each changed value
    /// into the previous generation
    pub fn take_changes(&mut self) -> Vec<StateChangeEvent> {
        let mut changes = Vec::new();
        for (attribute, value) in &self.current {
            let old = self.previous.get(attribute);
            if old != Some(value) {
                changes.push(StateChangeEvent::Changed {
                    attribute: *attribute,
                    old: old.cloned(),
                    new: value.clone(),
                });
            }
        }

        for change in &changes {
            if let StateChangeEvent::Changed { attribute, new, .. } = change {
                self.previous.insert(*attribute, new.clone());
            }
        }
        changes
    }
}

struct SyncTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polling loop, state snapshot and write path
pub struct StateManager {
    transport: Arc<dyn WmpTransport>,
    queue: CommandQueue,
    codec: SensorCodec,
    config: DriverConfig,
    state: RwLock<DeviceState>,
    limits: RwLock<SetpointLimits>,
    phase: RwLock<SyncPhase>,
    events: broadcast::Sender<StateChangeEvent>,
    poll_lock: Mutex<()>,
    sync_task: SyncMutex<Option<SyncTask>>,
}

impl StateManager {
    pub fn new(transport: Arc<dyn WmpTransport>, config: DriverConfig) -> Self {
        let queue = CommandQueue::new(Arc::clone(&transport), config.ack_timeout);
        let (events, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        let limits = SetpointLimits {
            min: config.min_setpoint,
            max: config.max_setpoint,
        };

        Self {
            transport,
            queue,
            codec: SensorCodec::new(),
            config,
            state: RwLock::new(DeviceState::default()),
            limits: RwLock::new(limits),
            phase: RwLock::new(SyncPhase::Uninitialized),
            events,
            poll_lock: Mutex::new(()),
            sync_task: SyncMutex::new(None),
        }
    }

    pub fn codec(&self) -> &SensorCodec {
        &self.codec
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Last known value of an attribute
    pub fn get(&self, attribute: Attribute) -> Option<Value> {
        self.state.read().get(attribute).cloned()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> BTreeMap<Attribute, Value> {
        self.state.read().snapshot()
    }

    /// Whether a full poll has populated the state since the last reset
    pub fn is_valid(&self) -> bool {
        self.phase() == SyncPhase::Synced && !self.state.read().is_empty()
    }

    /// Latest known setpoint bounds
    pub fn limits(&self) -> SetpointLimits {
        *self.limits.read()
    }

    /// Start the polling loop. A second call while running is a no-op.
    pub fn start_synchronization(self: &Arc<Self>) {
        let mut task = self.sync_task.lock();
        if task.is_some() {
            debug!("Synchronization already running");
            return;
        }

        let period = self.config.sync_period.max(MIN_SYNC_PERIOD);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let manager = Arc::clone(self);

        let handle = tokio::spawn(async move {
            loop {
                manager.run_cycle().await;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
            debug!("Synchronization loop exited");
        });

        info!("Synchronization started, polling every {:?}", period);
        *task = Some(SyncTask { cancel, handle });
    }

    /// Stop the polling loop.
    ///
    /// A cycle already in flight completes; only the next one is cancelled.
    /// Queued writes are not affected.
    pub fn stop_synchronization(&self) {
        if let Some(task) = self.sync_task.lock().take() {
            task.cancel.cancel();
            drop(task.handle);
            info!("Synchronization stopped");
        }
    }

    /// Whether the polling loop is running
    pub fn is_synchronizing(&self) -> bool {
        self.sync_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// One loop iteration; never fails, a failed cycle resets the state
    pub async fn run_cycle(&self) {
        if let Err(e) = self.try_cycle().await {
            warn!("Poll cycle failed, resetting state: {}", e);
            self.reset();
        }
    }

    async fn try_cycle(&self) -> Result<()> {
        if self.phase() != SyncPhase::Synced {
            self.begin_sync();
        }
        self.refresh_state().await
    }

    fn begin_sync(&self) {
        *self.phase.write() = SyncPhase::Syncing;

        let limits = SetpointLimits {
            min: self.config.min_setpoint,
            max: self.config.max_setpoint,
        };
        {
            let mut state = self.state.write();
            state.clear();
            state.set(Attribute::MinSetpoint, Value::Number(limits.min));
            state.set(Attribute::MaxSetpoint, Value::Number(limits.max));
        }
        *self.limits.write() = limits;

        match self.codec.encode_limits(limits) {
            Ok(command) => {
                debug!("Pushing configured setpoint limits: {}", command);
                // Outcome is logged by the queue
                drop(self.queue.enqueue(command));
            }
            Err(e) => warn!("Cannot encode configured setpoint limits: {}", e),
        }
    }

    /// Clear both state generations and re-enter the first-cycle path
    pub fn reset(&self) {
        self.state.write().clear();
        *self.phase.write() = SyncPhase::Reset;
    }

    /// Poll every register once.
    ///
    /// Resolves when the dump terminator arrives, or fails with a timeout
    /// after the identify/poll budget. A completed poll marks the state valid.
    pub async fn refresh_state(&self) -> Result<()> {
        let changes = self.poll().await?;
        *self.phase.write() = SyncPhase::Synced;
        self.publish_changes(changes).await;
        Ok(())
    }

    async fn poll(&self) -> Result<Vec<StateChangeEvent>> {
        let _poll = self.poll_lock.lock().await;

        let channel = self.config.channel;
        let terminator = self.config.dump_terminator.as_str();
        let codec = &self.codec;
        let mut updates: Vec<(Attribute, Value)> = Vec::new();

        let started = Instant::now();
        let dump = PendingEvent::arm(
            self.transport.as_ref(),
            "register dump",
            self.config.identify_timeout,
            |event: &WmpEvent| {
                let WmpEvent::ChannelUpdate {
                    channel: from,
                    name,
                    value,
                } = event
                else {
                    return None;
                };
                if *from != channel {
                    return None;
                }

                if let Decoded::Value(attribute, value) = codec.decode(name, value) {
                    updates.push((attribute, value));
                }

                let is_terminator = name.eq_ignore_ascii_case(terminator)
                    || codec
                        .resolve(name)
                        .is_some_and(|d| d.function.eq_ignore_ascii_case(terminator));
                is_terminator.then_some(())
            },
        );

        self.transport.send_get(channel, ALL_REGISTERS).await?;
        dump.wait().await?;

        let elapsed = started.elapsed();
        if elapsed > self.config.slow_response_threshold {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow response from device: poll took {:?} (threshold {:?})",
                elapsed,
                self.config.slow_response_threshold
            );
        } else {
            debug!("Poll completed in {:?}", elapsed);
        }

        self.apply(updates);
        Ok(self.state.write().take_changes())
    }

    fn apply(&self, updates: Vec<(Attribute, Value)>) {
        let mut state = self.state.write();
        let mut limits = self.limits.write();

        for (attribute, value) in updates {
            match (attribute, value.as_f64()) {
                (Attribute::MinSetpoint, Some(min)) => limits.min = min,
                (Attribute::MaxSetpoint, Some(max)) => limits.max = max,
                _ => {}
            }
            state.set(attribute, value);
        }
    }

    async fn publish_changes(&self, changes: Vec<StateChangeEvent>) {
        if changes.is_empty() {
            return;
        }

        for change in changes {
            if let StateChangeEvent::Changed {
                attribute,
                old,
                new,
            } = &change
            {
                debug!(attribute = %attribute, "{} changed: {:?} -> {}", attribute, old, new);
            }
            // No subscribers is fine
            let _ = self.events.send(change);
        }

        // Let listeners drain the per-attribute events first
        tokio::task::yield_now().await;
        let _ = self.events.send(StateChangeEvent::Updated);
    }

    /// Write one attribute through the command queue.
    ///
    /// State is not updated here; the next poll reports the value the device
    /// actually adopted.
    pub async fn set(&self, attribute: Attribute, value: Value) -> Result<CommandResult> {
        let command = {
            let mut limits = self.limits.write();
            let command = self
                .codec
                .encode(self.config.channel, attribute, &value, *limits)?;

            match (attribute, value.as_f64()) {
                (Attribute::MinSetpoint, Some(min)) => limits.min = min,
                (Attribute::MaxSetpoint, Some(max)) => limits.max = max,
                _ => {}
            }
            command
        };

        info!(attribute = %attribute, command = %command, "Writing {} = {}", attribute, value);
        Ok(self.queue.submit(command).await)
    }

    /// Write an attribute given by name. Unknown names are logged and ignored.
    pub async fn set_by_name(&self, name: &str, value: Value) -> Result<Option<CommandResult>> {
        match name.parse::<Attribute>() {
            Ok(attribute) => self.set(attribute, value).await.map(Some),
            Err(e) => {
                warn!("Ignoring write: {}", e);
                Ok(None)
            }
        }
    }
}

impl Drop for StateManager {
    fn drop(&mut self) {
        if let Some(task) = self.sync_task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}
