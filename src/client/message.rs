//! WMP wire messages
//!
//! Outbound commands render to a single line without terminator (the line
//! codec appends CRLF). Inbound lines have the shape `code[,suffix]:rest` and
//! parse into a closed set of [`WmpEvent`] variants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel used for every GET/SET in this deployment
pub const DEFAULT_CHANNEL: u8 = 1;

/// Selector that requests every register on a channel
pub const ALL_REGISTERS: &str = "*";

/// Outbound WMP command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WmpCommand {
    /// `ID`: request device identification
    Id,
    /// `INFO`: request device information lines
    Info,
    /// `GET,<channel>:<selector>`
    Get { channel: u8, selector: String },
    /// `SET,<channel>:<function>,<value>`
    Set {
        channel: u8,
        function: String,
        value: String,
    },
    /// `LIMITS:<function>,[<min>,<max>]`
    Limits {
        function: String,
        min: String,
        max: String,
    },
    /// `PING`: keepalive
    Ping,
}

impl WmpCommand {
    /// Full-register poll on the given channel
    pub fn get_all(channel: u8) -> Self {
        WmpCommand::Get {
            channel,
            selector: ALL_REGISTERS.to_string(),
        }
    }

    /// Whether the device answers this command with `ACK`
    pub fn expects_ack(&self) -> bool {
        matches!(self, WmpCommand::Set { .. } | WmpCommand::Limits { .. })
    }
}

impl fmt::Display for WmpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WmpCommand::Id => write!(f, "ID"),
            WmpCommand::Info => write!(f, "INFO"),
            WmpCommand::Get { channel, selector } => write!(f, "GET,{channel}:{selector}"),
            WmpCommand::Set {
                channel,
                function,
                value,
            } => write!(f, "SET,{channel}:{function},{value}"),
            WmpCommand::Limits { function, min, max } => {
                write!(f, "LIMITS:{function},[{min},{max}]")
            }
            WmpCommand::Ping => write!(f, "PING"),
        }
    }
}

/// Parsed device identification from an `ID:` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub model: String,
    pub mac_address: String,
    pub ip_address: String,
    pub protocol_version: String,
    pub firmware_version: String,
    pub signal_strength: String,
    pub name: String,
    pub serial_number: String,
}

impl Identity {
    /// Parse the payload of an `ID:` line.
    ///
    /// The payload carries `model,mac,ip,protocol,firmware,rssi,name` followed
    /// by a trailing field that is ignored. Missing fields parse as empty
    /// strings except the model, which is required.
    pub fn parse(payload: &str) -> Option<Self> {
        let mut fields = payload.split(',').map(str::trim);
        let model = fields.next().filter(|m| !m.is_empty())?.to_string();
        let mut next = || fields.next().unwrap_or_default().to_string();

        let mac_address = next();
        let ip_address = next();
        let protocol_version = next();
        let firmware_version = next();
        let signal_strength = next();
        let name = next();
        let serial_number = serial_from_mac(&mac_address);

        Some(Self {
            model,
            mac_address,
            ip_address,
            protocol_version,
            firmware_version,
            signal_strength,
            name,
            serial_number,
        })
    }
}

/// Serial number derived from a MAC address: separators dropped, upper-cased
pub fn serial_from_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Inbound WMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WmpEvent {
    /// `ID:<payload>`
    Identify(String),
    /// `INFO:<name>,<value>`
    Info { name: String, value: String },
    /// `ACK`
    Ack,
    /// `CHN,<channel>:<name>,<value>`
    ChannelUpdate {
        channel: u8,
        name: String,
        value: String,
    },
    /// `PONG`
    Pong,
    /// Anything else
    Unrecognized { code: String, rest: String },
}

impl WmpEvent {
    /// Parse one framed line (terminator already stripped)
    pub fn parse(line: &str) -> Self {
        let (head, rest) = match line.split_once(':') {
            Some((head, rest)) => (head.trim(), rest),
            None => (line.trim(), ""),
        };
        let (code, suffix) = match head.split_once(',') {
            Some((code, suffix)) => (code, Some(suffix)),
            None => (head, None),
        };

        let unrecognized = || WmpEvent::Unrecognized {
            code: head.to_string(),
            rest: rest.to_string(),
        };

        match (code.to_ascii_uppercase().as_str(), suffix) {
            ("ID", None) => WmpEvent::Identify(rest.to_string()),
            ("INFO", None) => match rest.split_once(',') {
                Some((name, value)) => WmpEvent::Info {
                    name: name.to_string(),
                    value: value.to_string(),
                },
                None => unrecognized(),
            },
            ("ACK", None) => WmpEvent::Ack,
            ("PONG", None) => WmpEvent::Pong,
            ("CHN", Some(channel)) => {
                match (channel.trim().parse::<u8>(), rest.split_once(',')) {
                    (Ok(channel), Some((name, value))) => WmpEvent::ChannelUpdate {
                        channel,
                        name: name.to_string(),
                        value: value.to_string(),
                    },
                    _ => unrecognized(),
                }
            }
            _ => unrecognized(),
        }
    }

    /// Short label used in logs and timeout messages
    pub fn kind(&self) -> &'static str {
        match self {
            WmpEvent::Identify(_) => "ID",
            WmpEvent::Info { .. } => "INFO",
            WmpEvent::Ack => "ACK",
            WmpEvent::ChannelUpdate { .. } => "CHN",
            WmpEvent::Pong => "PONG",
            WmpEvent::Unrecognized { .. } => "unrecognized",
        }
    }
}
