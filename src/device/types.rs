use serde::{Serialize, Serializer};

use crate::device::constants::{
    xor_checksum, AUTO_OFF_RANGE, BEEP_LEVEL_RANGE, FRAME_PRODUCT, FRAME_TYPE_COMMAND, OP_AUTO_OFF,
    OP_BEEP_LEVEL, OP_FLOW_SMOOTHING, OP_RESET_TIMER, OP_START_TIMER, OP_STOP_TIMER, OP_TARE,
    OP_TARE_AND_START,
};
use crate::error::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Grams,
    Ounces,
    Unknown(u8),
}

impl Unit {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Unit::Grams,
            1 => Unit::Ounces,
            other => Unit::Unknown(other),
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unit::Grams => write!(f, "g"),
            Unit::Ounces => write!(f, "oz"),
            Unit::Unknown(byte) => write!(f, "unknown({})", byte),
        }
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Last known readings of the scale. Every field is optional because a
/// field stays absent until the first frame carrying it arrives.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub weight: Option<f64>,
    pub flow_rate: Option<f64>,
    pub timer_seconds: Option<f64>,
    pub battery_percent: Option<u8>,
    pub buzzer_level: Option<u8>,
    pub standby_minutes: Option<u16>,
    pub flow_smoothing_enabled: Option<bool>,
    pub unit: Option<Unit>,
}

/// The fields decoded from a single frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStateDelta {
    pub weight: Option<f64>,
    pub flow_rate: Option<f64>,
    pub timer_seconds: Option<f64>,
    pub battery_percent: Option<u8>,
    pub buzzer_level: Option<u8>,
    pub standby_minutes: Option<u16>,
    pub flow_smoothing_enabled: Option<bool>,
    pub unit: Option<Unit>,
}

impl DeviceStateDelta {
    pub fn is_empty(&self) -> bool {
        *self == DeviceStateDelta::default()
    }
}

impl DeviceState {
    /// Overwrite the fields present in `delta`, keep the rest.
    pub fn apply(&mut self, delta: &DeviceStateDelta) {
        fn set<T: Copy>(field: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *field = value;
            }
        }

        set(&mut self.weight, delta.weight);
        set(&mut self.flow_rate, delta.flow_rate);
        set(&mut self.timer_seconds, delta.timer_seconds);
        set(&mut self.battery_percent, delta.battery_percent);
        set(&mut self.buzzer_level, delta.buzzer_level);
        set(&mut self.standby_minutes, delta.standby_minutes);
        set(&mut self.flow_smoothing_enabled, delta.flow_smoothing_enabled);
        set(&mut self.unit, delta.unit);
    }
}

/// A consistent copy of the state store at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub state: DeviceState,
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A frame was merged into the state store.
    StateChanged,
    ConnectionChanged(bool),
    /// A poll tick completed.
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Tare,
    ResetTimer,
    StartTimer,
    StopTimer,
    TareAndStart,
    SetBeepLevel(u8),
    SetAutoOff(u16),
    SetFlowSmoothing(bool),
}

impl Command {
    pub fn validate(&self) -> Result<(), CommandError> {
        match *self {
            Command::SetBeepLevel(level) if !BEEP_LEVEL_RANGE.contains(&level) => {
                Err(CommandError::InvalidArgument(format!(
                    "beep level {} outside {}..={}",
                    level, BEEP_LEVEL_RANGE.start(), BEEP_LEVEL_RANGE.end()
                )))
            },
            Command::SetAutoOff(minutes) if !AUTO_OFF_RANGE.contains(&minutes) => {
                Err(CommandError::InvalidArgument(format!(
                    "auto-off {} minutes outside {}..={}",
                    minutes, AUTO_OFF_RANGE.start(), AUTO_OFF_RANGE.end()
                )))
            },
            _ => Ok(()),
        }
    }

    /// The command frame written to the command characteristic:
    /// `03 0A <op> <arg> 00 <xor>`. Call `validate` first; out of range
    /// arguments are truncated here.
    pub fn encode(&self) -> [u8; 6] {
        let (op, arg) = match *self {
            Command::Tare => (OP_TARE, 0),
            Command::SetBeepLevel(level) => (OP_BEEP_LEVEL, level),
            Command::SetAutoOff(minutes) => (OP_AUTO_OFF, minutes.min(u8::MAX as u16) as u8),
            Command::StartTimer => (OP_START_TIMER, 0),
            Command::StopTimer => (OP_STOP_TIMER, 0),
            Command::ResetTimer => (OP_RESET_TIMER, 0),
            Command::TareAndStart => (OP_TARE_AND_START, 0),
            Command::SetFlowSmoothing(enabled) => (OP_FLOW_SMOOTHING, enabled as u8),
        };

        let mut frame = [FRAME_PRODUCT, FRAME_TYPE_COMMAND, op, arg, 0x00, 0x00];
        frame[5] = xor_checksum(&frame[..5]);
        frame
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Tare => write!(f, "tare"),
            Command::ResetTimer => write!(f, "reset timer"),
            Command::StartTimer => write!(f, "start timer"),
            Command::StopTimer => write!(f, "stop timer"),
            Command::TareAndStart => write!(f, "tare and start timer"),
            Command::SetBeepLevel(level) => write!(f, "set beep level {}", level),
            Command::SetAutoOff(minutes) => write!(f, "set auto-off {} min", minutes),
            Command::SetFlowSmoothing(enabled) => write!(f, "set flow smoothing {}", enabled),
        }
    }
}
