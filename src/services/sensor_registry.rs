//! Register table and the sensor codec
//!
//! Every register the device reports is described once by a
//! [`SensorDescriptor`]. The [`SensorCodec`] indexes the table by register id,
//! by wire function name and by attribute, and translates in both directions.

use crate::client::message::WmpCommand;
use crate::error::{Result, WmpError};
use crate::services::value_parsers::{LabelTable, Sentinel, Transform, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Normalized attribute exposed by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Attribute {
    Active,
    CurrentTemperature,
    FanSpeed,
    Locked,
    MaxSetpoint,
    MinSetpoint,
    Mode,
    OutdoorTemperature,
    Setpoint,
    SwingMode,
}

impl Attribute {
    pub const ALL: [Attribute; 10] = [
        Attribute::Active,
        Attribute::CurrentTemperature,
        Attribute::FanSpeed,
        Attribute::Locked,
        Attribute::MaxSetpoint,
        Attribute::MinSetpoint,
        Attribute::Mode,
        Attribute::OutdoorTemperature,
        Attribute::Setpoint,
        Attribute::SwingMode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::Active => "active",
            Attribute::CurrentTemperature => "currentTemperature",
            Attribute::FanSpeed => "fanSpeed",
            Attribute::Locked => "locked",
            Attribute::MaxSetpoint => "maxSetpoint",
            Attribute::MinSetpoint => "minSetpoint",
            Attribute::Mode => "mode",
            Attribute::OutdoorTemperature => "outdoorTemperature",
            Attribute::Setpoint => "setpoint",
            Attribute::SwingMode => "swingMode",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attribute {
    type Err = WmpError;

    fn from_str(s: &str) -> Result<Self> {
        Attribute::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| WmpError::encoding(format!("unknown attribute: {s}")))
    }
}

/// Static description of one device register
#[derive(Debug, PartialEq)]
pub struct SensorDescriptor {
    pub register_id: u16,

    /// Function name used on the wire (`CHN`/`SET`)
    pub function: &'static str,

    /// `None` for registers that are deliberately ignored
    pub attribute: Option<Attribute>,

    pub transform: Option<Transform>,

    /// Whether `SET` is accepted for this register
    pub writable: bool,
}

static MODE_LABELS: LabelTable = LabelTable {
    entries: &[
        ("AUTO", "auto"),
        ("HEAT", "heat"),
        ("DRY", "dry"),
        ("FAN", "fan"),
        ("COOL", "cool"),
    ],
    default: "auto",
};

static FAN_SPEED_LABELS: LabelTable = LabelTable {
    entries: &[
        ("AUTO", "auto"),
        ("1", "quiet"),
        ("2", "low"),
        ("3", "medium"),
        ("4", "high"),
    ],
    default: "auto",
};

static SWING_LABELS: LabelTable = LabelTable {
    entries: &[
        ("AUTO", "auto"),
        ("1", "position1"),
        ("2", "position2"),
        ("3", "position3"),
        ("4", "position4"),
        ("5", "position5"),
        ("SWING", "swing"),
    ],
    default: "auto",
};

const TENTHS: Transform = Transform::Tenths { sentinel: None };

/// Ambient temperature reads 32768 when the unit has no valid reading
const AMBIENT_UNKNOWN: Sentinel = Sentinel {
    raw: 32768,
    value: 28.0,
};

const fn register(
    register_id: u16,
    function: &'static str,
    attribute: Attribute,
    transform: Transform,
    writable: bool,
) -> SensorDescriptor {
    SensorDescriptor {
        register_id,
        function,
        attribute: Some(attribute),
        transform: Some(transform),
        writable,
    }
}

const fn ignored(register_id: u16, function: &'static str) -> SensorDescriptor {
    SensorDescriptor {
        register_id,
        function,
        attribute: None,
        transform: None,
        writable: false,
    }
}

/// Registers known to the driver
pub static SENSOR_TABLE: &[SensorDescriptor] = &[
    register(1, "ONOFF", Attribute::Active, Transform::Switch, true),
    register(2, "MODE", Attribute::Mode, Transform::Labels(&MODE_LABELS), true),
    register(4, "FANSP", Attribute::FanSpeed, Transform::Labels(&FAN_SPEED_LABELS), true),
    register(5, "VANEUD", Attribute::SwingMode, Transform::Labels(&SWING_LABELS), true),
    ignored(6, "VANELR"),
    register(9, "SETPTEMP", Attribute::Setpoint, TENTHS, true),
    register(
        10,
        "AMBTEMP",
        Attribute::CurrentTemperature,
        Transform::Tenths {
            sentinel: Some(AMBIENT_UNKNOWN),
        },
        false,
    ),
    register(12, "LOCK", Attribute::Locked, Transform::Switch, true),
    ignored(14, "ERRSTATUS"),
    ignored(15, "ERRCODE"),
    register(35, "SETPTEMPMIN", Attribute::MinSetpoint, TENTHS, true),
    register(36, "SETPTEMPMAX", Attribute::MaxSetpoint, TENTHS, true),
    register(37, "OUTTEMP", Attribute::OutdoorTemperature, TENTHS, false),
];

/// Function name of the paired setpoint range command
pub const LIMITS_FUNCTION: &str = "SETPTEMP";

/// Latest known setpoint bounds in °C
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetpointLimits {
    pub min: f64,
    pub max: f64,
}

/// Outcome of decoding one register update
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Value(Attribute, Value),
    /// Known register without an attribute, or a malformed raw value
    Ignored,
    /// Register not in the table
    Unknown,
}

/// Bidirectional translation between registers and attributes
#[derive(Debug)]
pub struct SensorCodec {
    by_register: HashMap<u16, &'static SensorDescriptor>,
    by_function: HashMap<&'static str, &'static SensorDescriptor>,
    by_attribute: HashMap<Attribute, &'static SensorDescriptor>,
}

impl Default for SensorCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorCodec {
    /// Codec over the built-in register table
    pub fn new() -> Self {
        Self::with_descriptors(SENSOR_TABLE)
    }

    pub fn with_descriptors(descriptors: &'static [SensorDescriptor]) -> Self {
        let mut by_register = HashMap::new();
        let mut by_function = HashMap::new();
        let mut by_attribute = HashMap::new();

        for descriptor in descriptors {
            by_register.insert(descriptor.register_id, descriptor);
            by_function.insert(descriptor.function, descriptor);
            if let Some(attribute) = descriptor.attribute {
                by_attribute.insert(attribute, descriptor);
            }
        }

        Self {
            by_register,
            by_function,
            by_attribute,
        }
    }

    /// Look up a register by wire function name or numeric id
    pub fn resolve(&self, name: &str) -> Option<&'static SensorDescriptor> {
        let name = name.trim();
        if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
            return name
                .parse::<u16>()
                .ok()
                .and_then(|id| self.by_register.get(&id).copied());
        }
        self.by_function
            .get(name.to_ascii_uppercase().as_str())
            .copied()
    }

    /// Descriptor behind an attribute
    pub fn descriptor(&self, attribute: Attribute) -> Option<&'static SensorDescriptor> {
        self.by_attribute.get(&attribute).copied()
    }

    /// Decode a channel update by register name
    pub fn decode(&self, name: &str, raw: &str) -> Decoded {
        match self.resolve(name) {
            Some(descriptor) => Self::decode_with(descriptor, raw),
            None => {
                warn!("Unknown register {} (raw value {:?})", name, raw);
                Decoded::Unknown
            }
        }
    }

    fn decode_with(descriptor: &SensorDescriptor, raw: &str) -> Decoded {
        let (Some(attribute), Some(transform)) = (descriptor.attribute, descriptor.transform) else {
            debug!("Ignoring register {} = {}", descriptor.function, raw);
            return Decoded::Ignored;
        };

        match transform.decode(raw) {
            Ok(value) => Decoded::Value(attribute, value),
            Err(e) => {
                warn!("Dropping {} update: {}", descriptor.function, e);
                Decoded::Ignored
            }
        }
    }

    /// Build the wire command that writes `value` to `attribute`.
    ///
    /// Writing either setpoint bound produces the paired `LIMITS` command;
    /// the other bound is taken from `limits`.
    pub fn encode(
        &self,
        channel: u8,
        attribute: Attribute,
        value: &Value,
        limits: SetpointLimits,
    ) -> Result<WmpCommand> {
        match attribute {
            Attribute::MinSetpoint | Attribute::MaxSetpoint => {
                let bound = value.as_f64().ok_or_else(|| {
                    WmpError::encoding(format!("{attribute} needs a number, got {value:?}"))
                })?;
                let limits = match attribute {
                    Attribute::MinSetpoint => SetpointLimits { min: bound, ..limits },
                    _ => SetpointLimits { max: bound, ..limits },
                };
                self.encode_limits(limits)
            }
            _ => {
                let descriptor = self.writable_descriptor(attribute)?;
                let transform = descriptor.transform.ok_or_else(|| {
                    WmpError::encoding(format!("{attribute} has no value transform"))
                })?;
                Ok(WmpCommand::Set {
                    channel,
                    function: descriptor.function.to_string(),
                    value: transform.encode(value)?,
                })
            }
        }
    }

    /// Build the paired `LIMITS` command for a setpoint range
    pub fn encode_limits(&self, limits: SetpointLimits) -> Result<WmpCommand> {
        let raw = |attribute: Attribute, bound: f64| -> Result<String> {
            let transform = self
                .writable_descriptor(attribute)?
                .transform
                .unwrap_or(TENTHS);
            transform.encode(&Value::Number(bound))
        };

        Ok(WmpCommand::Limits {
            function: LIMITS_FUNCTION.to_string(),
            min: raw(Attribute::MinSetpoint, limits.min)?,
            max: raw(Attribute::MaxSetpoint, limits.max)?,
        })
    }

    /// Transform used for an attribute, for parsing user input
    pub fn transform(&self, attribute: Attribute) -> Option<Transform> {
        self.descriptor(attribute).and_then(|d| d.transform)
    }

    fn writable_descriptor(&self, attribute: Attribute) -> Result<&'static SensorDescriptor> {
        match self.descriptor(attribute) {
            Some(descriptor) if descriptor.writable => Ok(descriptor),
            Some(_) => Err(WmpError::encoding(format!("{attribute} is read-only"))),
            None => Err(WmpError::encoding(format!("{attribute} has no register"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    const DEFAULT_LIMITS: SetpointLimits = SetpointLimits {
        min: 18.0,
        max: 30.0,
    };

    #[test]
    fn test_decode_setpoint() {
        let codec = SensorCodec::new();
        assert_eq!(
            codec.decode("SETPTEMP", "215"),
            Decoded::Value(Attribute::Setpoint, Value::Number(21.5))
        );
        assert_eq!(
            codec.decode("9", "215"),
            Decoded::Value(Attribute::Setpoint, Value::Number(21.5))
        );
    }

    #[test]
    fn test_decode_ambient_sentinel() {
        let codec = SensorCodec::new();
        assert_eq!(
            codec.decode("AMBTEMP", "32768"),
            Decoded::Value(Attribute::CurrentTemperature, Value::Number(28.0))
        );
    }

    #[test]
    fn test_ignored_and_unknown_are_distinct() {
        let codec = SensorCodec::new();
        assert_eq!(codec.decode("ERRCODE", "0"), Decoded::Ignored);
        assert_eq!(codec.decode("VANELR", "3"), Decoded::Ignored);
        assert_eq!(codec.decode("999", "5"), Decoded::Unknown);
    }

    #[traced_test]
    #[test]
    fn test_unknown_register_is_logged() {
        let codec = SensorCodec::new();
        assert_eq!(codec.decode("999", "5"), Decoded::Unknown);
        assert!(logs_contain("Unknown register 999"));
    }

    #[test]
    fn test_tenths_round_trip() {
        let codec = SensorCodec::new();
        for raw in ["180", "215", "300"] {
            let Decoded::Value(attribute, value) = codec.decode("SETPTEMP", raw) else {
                panic!("setpoint must decode");
            };
            let command = codec.encode(1, attribute, &value, DEFAULT_LIMITS).unwrap();
            assert_eq!(command.to_string(), format!("SET,1:SETPTEMP,{raw}"));
        }
    }

    fn raw_samples(transform: Transform) -> Vec<&'static str> {
        match transform {
            Transform::Switch => vec!["ON", "OFF"],
            Transform::Tenths { .. } => vec!["160", "215", "300"],
            Transform::Labels(table) => table.entries.iter().map(|(raw, _)| *raw).collect(),
        }
    }

    #[test]
    fn test_every_writable_register_round_trips() {
        let codec = SensorCodec::new();
        let writable: Vec<&SensorDescriptor> = SENSOR_TABLE.iter().filter(|d| d.writable).collect();
        assert_eq!(writable.len(), 8);

        for descriptor in writable {
            let transform = descriptor.transform.unwrap();
            for raw in raw_samples(transform) {
                let Decoded::Value(attribute, value) = codec.decode(descriptor.function, raw) else {
                    panic!("{} = {raw} must decode", descriptor.function);
                };

                let line = codec
                    .encode(1, attribute, &value, DEFAULT_LIMITS)
                    .unwrap()
                    .to_string();
                let expected = match attribute {
                    Attribute::MinSetpoint => format!("LIMITS:SETPTEMP,[{raw},300]"),
                    Attribute::MaxSetpoint => format!("LIMITS:SETPTEMP,[180,{raw}]"),
                    _ => format!("SET,1:{},{raw}", descriptor.function),
                };
                assert_eq!(line, expected, "round trip of {} = {raw}", descriptor.function);
            }
        }
    }

    #[test]
    fn test_encode_labels() {
        let codec = SensorCodec::new();
        let command = codec
            .encode(1, Attribute::FanSpeed, &Value::from("medium"), DEFAULT_LIMITS)
            .unwrap();
        assert_eq!(command.to_string(), "SET,1:FANSP,3");

        let command = codec
            .encode(1, Attribute::Mode, &Value::from("blizzard"), DEFAULT_LIMITS)
            .unwrap();
        assert_eq!(command.to_string(), "SET,1:MODE,AUTO");
    }

    #[test]
    fn test_encode_bound_pairs_with_other_bound() {
        let codec = SensorCodec::new();
        let limits = SetpointLimits {
            min: 16.0,
            max: 28.5,
        };

        let command = codec
            .encode(1, Attribute::MinSetpoint, &Value::Number(17.0), limits)
            .unwrap();
        assert_eq!(command.to_string(), "LIMITS:SETPTEMP,[170,285]");

        let command = codec
            .encode(1, Attribute::MaxSetpoint, &Value::Number(31.0), limits)
            .unwrap();
        assert_eq!(command.to_string(), "LIMITS:SETPTEMP,[160,310]");
    }

    #[test]
    fn test_read_only_attribute_rejected() {
        let codec = SensorCodec::new();
        let err = codec
            .encode(1, Attribute::CurrentTemperature, &Value::Number(20.0), DEFAULT_LIMITS)
            .unwrap_err();
        assert!(matches!(err, WmpError::Encoding(_)));
    }

    #[test]
    fn test_attribute_names() {
        assert_eq!("setpoint".parse::<Attribute>().unwrap(), Attribute::Setpoint);
        assert_eq!("fanspeed".parse::<Attribute>().unwrap(), Attribute::FanSpeed);
        assert!("humidity".parse::<Attribute>().is_err());
        assert_eq!(Attribute::OutdoorTemperature.to_string(), "outdoorTemperature");
    }
}
