//! WMP client: line transport, acknowledgment correlation and command queue

pub mod command_queue;
pub mod correlator;
pub mod line_codec;
pub mod message;
pub mod tcp_client;

use crate::error::Result;
use async_trait::async_trait;
use message::{Identity, WmpCommand, WmpEvent};
use tokio::sync::broadcast;

pub use command_queue::{CommandQueue, CommandResult, CommandTicket, PendingCommand};
pub use correlator::{await_event, PendingEvent};
pub use tcp_client::{TcpTransport, TransportRegistry, TransportStats};

/// Capacity of the per-transport event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event published by a transport to all of its subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A socket was opened (initial connect or reconnect)
    Connected,
    /// A complete inbound line was parsed
    Message(WmpEvent),
    /// A socket error occurred; the close event that follows drives recovery
    Error(String),
    /// The socket was closed; a reconnect is scheduled
    Closed,
}

/// Shared access to a device connection.
///
/// There is exactly one transport per device host. The synchronizer and the
/// command queue both hold it behind an `Arc` and only talk to it through
/// this trait, which also lets tests substitute an in-memory transport.
#[async_trait]
pub trait WmpTransport: Send + Sync {
    /// Write one command (fire-and-forget, CRLF-terminated on the wire)
    async fn send(&self, command: WmpCommand) -> Result<()>;

    /// Request registers on the given channel (`"*"` for all of them)
    async fn send_get(&self, channel: u8, selector: &str) -> Result<()> {
        self.send(WmpCommand::Get {
            channel,
            selector: selector.to_string(),
        })
        .await
    }

    /// Subscribe to transport events. Subscriptions survive reconnects.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Identity reported on the current connection, if any
    fn identity(&self) -> Option<Identity>;

    /// Whether a socket is currently open
    fn is_connected(&self) -> bool;
}
