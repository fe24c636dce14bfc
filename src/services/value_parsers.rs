//! Value transforms between raw register values and normalized values
//!
//! Raw values are the strings the device puts on the wire. Normalized values
//! are what the rest of the driver works with: booleans for switches, degrees
//! Celsius for temperatures and lower-case labels for enumerations.

use crate::error::{Result, WmpError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

/// Raw value that decodes to a fixed number instead of being scaled
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sentinel {
    pub raw: i64,
    pub value: f64,
}

/// Raw label to normalized label table with a fallback
#[derive(Debug, PartialEq)]
pub struct LabelTable {
    /// `(raw, normalized)` pairs
    pub entries: &'static [(&'static str, &'static str)],

    /// Normalized label used when nothing matches
    pub default: &'static str,
}

impl LabelTable {
    fn decode(&self, raw: &str) -> &'static str {
        self.entries
            .iter()
            .find(|(r, _)| r.eq_ignore_ascii_case(raw.trim()))
            .map(|(_, label)| *label)
            .unwrap_or(self.default)
    }

    fn encode(&self, label: &str) -> &'static str {
        let lookup = |wanted: &str| {
            self.entries
                .iter()
                .find(|(_, l)| l.eq_ignore_ascii_case(wanted))
                .map(|(raw, _)| *raw)
        };
        lookup(label.trim())
            .or_else(|| lookup(self.default))
            .unwrap_or_default()
    }
}

/// Per-register value transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    /// `ON`/`OFF` to bool; anything else reads as off
    Switch,

    /// Integer tenths of a degree to degrees
    Tenths { sentinel: Option<Sentinel> },

    /// Enumeration through a label table
    Labels(&'static LabelTable),
}

impl Transform {
    /// Raw wire value to normalized value
    pub fn decode(&self, raw: &str) -> Result<Value> {
        let raw = raw.trim();
        match self {
            Transform::Switch => Ok(Value::Bool(
                raw.eq_ignore_ascii_case("ON") || raw == "1",
            )),
            Transform::Tenths { sentinel } => {
                let tenths: i64 = raw
                    .parse()
                    .map_err(|_| WmpError::protocol(format!("not an integer register value: {raw:?}")))?;
                match sentinel {
                    Some(s) if s.raw == tenths => Ok(Value::Number(s.value)),
                    _ => Ok(Value::Number(tenths as f64 / 10.0)),
                }
            }
            Transform::Labels(table) => Ok(Value::Text(table.decode(raw).to_string())),
        }
    }

    /// Normalized value to raw wire value
    pub fn encode(&self, value: &Value) -> Result<String> {
        match (self, value) {
            (Transform::Switch, Value::Bool(on)) => Ok(if *on { "ON" } else { "OFF" }.to_string()),
            (Transform::Tenths { .. }, Value::Number(n)) if n.is_finite() => {
                Ok(((n * 10.0).round() as i64).to_string())
            }
            (Transform::Labels(table), Value::Text(label)) => Ok(table.encode(label).to_string()),
            (transform, value) => Err(WmpError::encoding(format!(
                "{value:?} cannot be encoded as {}",
                transform.kind()
            ))),
        }
    }

    /// Parse user input (for example a CLI argument) into a value of this kind
    pub fn parse_input(&self, input: &str) -> Result<Value> {
        let input = input.trim();
        match self {
            Transform::Switch => match input.to_ascii_lowercase().as_str() {
                "on" | "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "off" | "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(WmpError::encoding(format!("expected on/off, got {input:?}"))),
            },
            Transform::Tenths { .. } => input
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| WmpError::encoding(format!("expected a temperature, got {input:?}"))),
            Transform::Labels(_) => Ok(Value::Text(input.to_ascii_lowercase())),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Transform::Switch => "switch",
            Transform::Tenths { .. } => "temperature",
            Transform::Labels(_) => "label",
        }
    }
}
