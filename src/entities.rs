//! Static entity tables: how the home-automation side presents a scale.
//!
//! Each entry maps an entity key to plain functions reading a [`Snapshot`] or
//! building a [`Command`]; there is no per-entity type.

use serde_json::{Map, Value};

use crate::device::types::{Command, Snapshot};
use crate::error::CommandError;

pub struct SensorDescription {
    pub key: &'static str,
    pub unit: &'static str,
    pub precision: Option<u8>,
    pub value_fn: fn(&Snapshot) -> Option<f64>,
}

pub struct BinarySensorDescription {
    pub key: &'static str,
    pub is_on_fn: fn(&Snapshot) -> bool,
}

pub struct NumberDescription {
    pub key: &'static str,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub value_fn: fn(&Snapshot) -> Option<f64>,
    pub command_fn: fn(f64) -> Command,
}

pub struct SwitchDescription {
    pub key: &'static str,
    pub is_on_fn: fn(&Snapshot) -> Option<bool>,
    pub command_fn: fn(bool) -> Command,
}

pub struct ButtonDescription {
    pub key: &'static str,
    pub command: Command,
}

pub const SENSORS: &[SensorDescription] = &[
    SensorDescription {
        key: "weight",
        unit: "g",
        precision: None,
        value_fn: |snapshot| snapshot.state.weight,
    },
    SensorDescription {
        key: "flow_rate",
        unit: "mL/s",
        precision: Some(1),
        value_fn: |snapshot| snapshot.state.flow_rate,
    },
    SensorDescription {
        key: "timer",
        unit: "s",
        precision: Some(2),
        value_fn: |snapshot| snapshot.state.timer_seconds,
    },
    SensorDescription {
        key: "battery",
        unit: "%",
        precision: None,
        value_fn: |snapshot| snapshot.state.battery_percent.map(f64::from),
    },
];

pub const BINARY_SENSORS: &[BinarySensorDescription] = &[
    BinarySensorDescription {
        key: "connected",
        is_on_fn: |snapshot| snapshot.connected,
    },
];

pub const NUMBERS: &[NumberDescription] = &[
    NumberDescription {
        key: "beep_level",
        min: 0.0,
        max: 5.0,
        step: 1.0,
        value_fn: |snapshot| snapshot.state.buzzer_level.map(f64::from),
        command_fn: |value| Command::SetBeepLevel(value as u8),
    },
    NumberDescription {
        key: "auto_off",
        min: 1.0,
        max: 30.0,
        step: 1.0,
        value_fn: |snapshot| snapshot.state.standby_minutes.map(f64::from),
        command_fn: |value| Command::SetAutoOff(value as u16),
    },
];

pub const SWITCHES: &[SwitchDescription] = &[
    SwitchDescription {
        key: "flow_smoothing",
        is_on_fn: |snapshot| snapshot.state.flow_smoothing_enabled,
        command_fn: Command::SetFlowSmoothing,
    },
];

pub const BUTTONS: &[ButtonDescription] = &[
    ButtonDescription { key: "tare", command: Command::Tare },
    ButtonDescription { key: "reset_timer", command: Command::ResetTimer },
    ButtonDescription { key: "start", command: Command::StartTimer },
    ButtonDescription { key: "stop", command: Command::StopTimer },
    ButtonDescription { key: "tare_and_start", command: Command::TareAndStart },
];

impl NumberDescription {
    pub fn command(&self, value: f64) -> Result<Command, CommandError> {
        if !value.is_finite() || value < self.min || value > self.max {
            return Err(CommandError::InvalidArgument(format!(
                "{} must be within {}..={}, got {}", self.key, self.min, self.max, value
            )));
        }

        Ok((self.command_fn)(value.round()))
    }
}

/// Entities of a disconnected scale show as unavailable, except the
/// connectivity sensor itself.
pub fn available(snapshot: &Snapshot) -> bool {
    snapshot.connected
}

/// Resolves `<key> [value]` to a command: buttons take no value, numbers a
/// number, switches `on`/`off`.
pub fn parse_command(key: &str, value: Option<&str>) -> Result<Command, CommandError> {
    if let Some(button) = BUTTONS.iter().find(|button| button.key == key) {
        return Ok(button.command);
    }

    if let Some(number) = NUMBERS.iter().find(|number| number.key == key) {
        let value = value
            .and_then(|value| value.parse::<f64>().ok())
            .ok_or_else(|| CommandError::InvalidArgument(format!("{} needs a number", key)))?;
        return number.command(value);
    }

    if let Some(switch) = SWITCHES.iter().find(|switch| switch.key == key) {
        let on = match value {
            Some("on") | Some("true") | Some("1") => true,
            Some("off") | Some("false") | Some("0") => false,
            _ => return Err(CommandError::InvalidArgument(format!("{} needs on or off", key))),
        };
        return Ok((switch.command_fn)(on));
    }

    Err(CommandError::InvalidArgument(format!("unknown entity {}", key)))
}

/// Flat `key -> value` view of every readable entity, plus `available`.
pub fn render(snapshot: &Snapshot) -> Map<String, Value> {
    let mut entities = Map::new();
    entities.insert("available".into(), Value::Bool(available(snapshot)));

    for sensor in SENSORS {
        entities.insert(sensor.key.into(), (sensor.value_fn)(snapshot).map_or(Value::Null, Value::from));
    }
    for sensor in BINARY_SENSORS {
        entities.insert(sensor.key.into(), Value::Bool((sensor.is_on_fn)(snapshot)));
    }
    for number in NUMBERS {
        entities.insert(number.key.into(), (number.value_fn)(snapshot).map_or(Value::Null, Value::from));
    }
    for switch in SWITCHES {
        entities.insert(switch.key.into(), (switch.is_on_fn)(snapshot).map_or(Value::Null, Value::Bool));
    }
    if let Some(unit) = snapshot.state.unit {
        entities.insert("unit".into(), Value::String(unit.to_string()));
    }

    entities
}
