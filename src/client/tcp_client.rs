//! TCP line transport for the WMP control port
//!
//! One [`TcpTransport`] owns the socket for one device host. A supervisor task
//! connects, sends `ID` and `INFO`, starts the keepalive, reads and dispatches
//! lines, and after a close waits a fixed delay before connecting again.
//! Reconnects are strictly sequential because the supervisor is the only task
//! that opens sockets. Subscribers attach to the transport's broadcast
//! channel, not to a socket, so they stay attached across reconnects.
//!
//! The device only accepts a handful of simultaneous connections, so handles
//! are obtained through a [`TransportRegistry`] that hands out the existing
//! transport for a host instead of opening a second socket.

use crate::client::line_codec::WmpLineCodec;
use crate::client::message::{Identity, WmpCommand, WmpEvent};
use crate::client::{TransportEvent, WmpTransport, EVENT_CHANNEL_CAPACITY};
use crate::config::DriverConfig;
use crate::error::{Result, WmpError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

type LineWriter = FramedWrite<OwnedWriteHalf, WmpLineCodec>;

/// Transport statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransportStats {
    /// Successful socket opens
    pub connects: u64,

    /// Socket closes (by either side)
    pub disconnects: u64,

    /// Connect attempts made after the first one
    pub reconnect_attempts: u64,

    /// Complete lines received
    pub lines_received: u64,

    /// Lines that did not parse into a known message
    pub unrecognized_lines: u64,

    /// When the current or last socket was opened
    pub last_connected: Option<DateTime<Utc>>,
}

/// Line transport over TCP
pub struct TcpTransport {
    config: DriverConfig,
    events: broadcast::Sender<TransportEvent>,
    writer: Mutex<Option<LineWriter>>,
    identity: SyncRwLock<Option<Identity>>,
    connected: AtomicBool,
    stats: SyncRwLock<TransportStats>,
    cancel: CancellationToken,
    supervisor: SyncMutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Create the transport and start connecting in the background.
    ///
    /// Prefer [`TransportRegistry::get_or_start`], which guarantees a single
    /// transport per host.
    pub fn start(config: DriverConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let transport = Arc::new(Self {
            config,
            events,
            writer: Mutex::new(None),
            identity: SyncRwLock::new(None),
            connected: AtomicBool::new(false),
            stats: SyncRwLock::new(TransportStats::default()),
            cancel: CancellationToken::new(),
            supervisor: SyncMutex::new(None),
        });

        let handle = tokio::spawn(Arc::clone(&transport).supervise());
        *transport.supervisor.lock() = Some(handle);
        transport
    }

    /// Device host this transport is bound to
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Snapshot of transport statistics
    pub fn stats(&self) -> TransportStats {
        self.stats.read().clone()
    }

    /// Wait until a socket is open
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.events.subscribe();
        if self.is_connected() {
            return Ok(());
        }

        tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(TransportEvent::Connected) => return Ok(()),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.is_connected() {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(WmpError::shutdown("transport event channel closed"));
                    }
                }
            }
        })
        .await
        .map_err(|_| {
            WmpError::timeout(format!(
                "no connection to {} within {:?}",
                self.config.address(),
                timeout
            ))
        })?
    }

    /// Stop reconnecting and close the socket
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Transport supervisor for {} panicked: {}", self.config.host, e);
                }
            }
        }
        info!("Transport for {} shut down", self.config.host);
    }

    async fn supervise(self: Arc<Self>) {
        let address = self.config.address();
        let mut first_attempt = true;

        loop {
            if !first_attempt {
                self.stats.write().reconnect_attempts += 1;
                info!(
                    "Reconnecting to {} in {:?}",
                    address, self.config.reconnect_delay
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = sleep(self.config.reconnect_delay) => {}
                }
            }
            first_attempt = false;

            debug!("Connecting to {}", address);
            let connect = tokio::time::timeout(
                self.config.connect_timeout,
                TcpStream::connect(address.as_str()),
            );
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = connect => outcome,
            };

            match outcome {
                Ok(Ok(stream)) => self.run_connection(stream).await,
                Ok(Err(e)) => {
                    warn!("Failed to connect to {}: {}", address, e);
                    self.publish(TransportEvent::Error(e.to_string()));
                }
                Err(_) => {
                    warn!(
                        "Connecting to {} timed out after {:?}",
                        address, self.config.connect_timeout
                    );
                    self.publish(TransportEvent::Error("connect timed out".to_string()));
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
        }

        debug!("Transport supervisor for {} stopped", address);
    }

    async fn run_connection(self: &Arc<Self>, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(FramedWrite::new(write_half, WmpLineCodec::new()));
        self.connected.store(true, Ordering::SeqCst);
        {
            let mut stats = self.stats.write();
            stats.connects += 1;
            stats.last_connected = Some(Utc::now());
        }
        info!("Connected to WMP device at {}", self.config.address());
        self.publish(TransportEvent::Connected);

        for request in [WmpCommand::Id, WmpCommand::Info] {
            if let Err(e) = self.send(request).await {
                warn!("Failed to request device identification: {}", e);
                break;
            }
        }
        let keepalive = self.spawn_keepalive();

        let mut lines = FramedRead::new(read_half, WmpLineCodec::new());
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = lines.next() => next,
            };

            match next {
                Some(Ok(line)) => self.dispatch(&line),
                Some(Err(e)) => {
                    warn!("Socket error on {}: {}", self.config.address(), e);
                    self.publish(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    info!("Connection to {} closed by device", self.config.address());
                    break;
                }
            }
        }

        keepalive.abort();
        *self.writer.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
        *self.identity.write() = None;
        self.stats.write().disconnects += 1;
        self.publish(TransportEvent::Closed);
    }

    fn spawn_keepalive(self: &Arc<Self>) -> JoinHandle<()> {
        let transport = Arc::clone(self);
        let period = self.config.keepalive_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = transport.send(WmpCommand::Ping).await {
                    debug!("Keepalive stopped: {}", e);
                    break;
                }
            }
        })
    }

    fn dispatch(&self, line: &str) {
        trace!("<- {}", line);
        let event = WmpEvent::parse(line);
        self.stats.write().lines_received += 1;

        match &event {
            WmpEvent::Identify(payload) => match Identity::parse(payload) {
                Some(identity) => {
                    info!(
                        "Device identified: model={} mac={} firmware={}",
                        identity.model, identity.mac_address, identity.firmware_version
                    );
                    *self.identity.write() = Some(identity);
                }
                None => warn!("Malformed identification line: {}", line),
            },
            WmpEvent::Info { name, value } => debug!("Device info {} = {}", name, value),
            WmpEvent::Pong => trace!("Keepalive answered"),
            WmpEvent::Unrecognized { code, rest } => {
                self.stats.write().unrecognized_lines += 1;
                warn!("Unrecognized line from device: code={} rest={}", code, rest);
            }
            WmpEvent::Ack | WmpEvent::ChannelUpdate { .. } => {}
        }

        self.publish(TransportEvent::Message(event));
    }

    fn publish(&self, event: TransportEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl WmpTransport for TcpTransport {
    async fn send(&self, command: WmpCommand) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            WmpError::not_connected(format!("no open socket to {}", self.config.address()))
        })?;

        debug!("-> {}", command);
        writer.send(command).await.map_err(|e| {
            warn!("Write to {} failed: {}", self.config.address(), e);
            WmpError::connection(format!("write failed: {e}"))
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Hands out at most one transport per device host
#[derive(Default)]
pub struct TransportRegistry {
    transports: SyncMutex<HashMap<String, Arc<TcpTransport>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the transport for `config.host`, starting it on first use.
    ///
    /// Later calls for the same host return the existing instance and ignore
    /// the rest of `config`.
    pub fn get_or_start(&self, config: &DriverConfig) -> Arc<TcpTransport> {
        let mut transports = self.transports.lock();
        if let Some(existing) = transports.get(&config.host) {
            debug!("Reusing transport for {}", config.host);
            return Arc::clone(existing);
        }

        let transport = TcpTransport::start(config.clone());
        transports.insert(config.host.clone(), Arc::clone(&transport));
        transport
    }

    /// Number of live transports
    pub fn len(&self) -> usize {
        self.transports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut down and forget every transport
    pub async fn shutdown_all(&self) {
        let transports: Vec<Arc<TcpTransport>> =
            self.transports.lock().drain().map(|(_, t)| t).collect();
        for transport in transports {
            transport.shutdown().await;
        }
    }
}
