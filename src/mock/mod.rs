//! Mock implementations for testing
//!
//! [`MockTransport`] records every command written to it and lets tests push
//! inbound events. It can also play a scripted device: acknowledge writes,
//! answer `ID`, and answer `GET` with a register dump.

use crate::client::message::{Identity, WmpCommand, WmpEvent};
use crate::client::{TransportEvent, WmpTransport, EVENT_CHANNEL_CAPACITY};
use crate::error::{Result, WmpError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// In-memory transport double
pub struct MockTransport {
    events: broadcast::Sender<TransportEvent>,
    sent: Mutex<Vec<WmpCommand>>,
    connected: AtomicBool,
    auto_ack: AtomicBool,
    identify_payload: Mutex<Option<String>>,
    dump: Mutex<Option<Vec<(String, String)>>>,
    dump_delay: Mutex<Option<Duration>>,
    polls: AtomicUsize,
}

impl MockTransport {
    /// Create a connected mock that never answers
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events,
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            auto_ack: AtomicBool::new(false),
            identify_payload: Mutex::new(None),
            dump: Mutex::new(None),
            dump_delay: Mutex::new(None),
            polls: AtomicUsize::new(0),
        }
    }

    /// Answer every `SET`/`LIMITS` with `ACK`
    pub fn with_auto_ack(self) -> Self {
        self.auto_ack.store(true, Ordering::SeqCst);
        self
    }

    /// Answer `ID` with the given payload
    pub fn with_identify(self, payload: &str) -> Self {
        *self.identify_payload.lock() = Some(payload.to_string());
        self
    }

    /// Answer `GET` with these `(function, raw value)` channel updates
    pub fn with_dump(self, registers: &[(&str, &str)]) -> Self {
        self.set_dump(registers);
        self
    }

    /// Replace the scripted dump
    pub fn set_dump(&self, registers: &[(&str, &str)]) {
        *self.dump.lock() = Some(
            registers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        );
    }

    /// Delay the scripted dump by `delay`
    pub fn set_dump_delay(&self, delay: Option<Duration>) {
        *self.dump_delay.lock() = delay;
    }

    /// Simulate socket presence; writes fail while disconnected
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Push an inbound message to all subscribers
    pub fn inject(&self, event: WmpEvent) {
        let _ = self.events.send(TransportEvent::Message(event));
    }

    /// Push a raw transport event to all subscribers
    pub fn inject_transport(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Commands written so far
    pub fn sent(&self) -> Vec<WmpCommand> {
        self.sent.lock().clone()
    }

    /// Rendered wire lines written so far
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent.lock().iter().map(ToString::to_string).collect()
    }

    /// Number of `GET` commands received
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn play_dump(&self, channel: u8) {
        let Some(dump) = self.dump.lock().clone() else {
            return;
        };
        let updates: Vec<TransportEvent> = dump
            .into_iter()
            .map(|(name, value)| {
                TransportEvent::Message(WmpEvent::ChannelUpdate {
                    channel,
                    name,
                    value,
                })
            })
            .collect();

        match *self.dump_delay.lock() {
            Some(delay) => {
                let events = self.events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for update in updates {
                        let _ = events.send(update);
                    }
                });
            }
            None => {
                for update in updates {
                    let _ = self.events.send(update);
                }
            }
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WmpTransport for MockTransport {
    async fn send(&self, command: WmpCommand) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WmpError::not_connected("mock transport is disconnected"));
        }

        self.sent.lock().push(command.clone());

        match &command {
            WmpCommand::Id => {
                let payload = self.identify_payload.lock().clone();
                if let Some(payload) = payload {
                    self.inject(WmpEvent::Identify(payload));
                }
            }
            WmpCommand::Get { channel, .. } => {
                self.polls.fetch_add(1, Ordering::SeqCst);
                self.play_dump(*channel);
            }
            WmpCommand::Ping => self.inject(WmpEvent::Pong),
            _ => {}
        }

        if command.expects_ack() && self.auto_ack.load(Ordering::SeqCst) {
            self.inject(WmpEvent::Ack);
        }

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn identity(&self) -> Option<Identity> {
        None
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
