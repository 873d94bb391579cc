use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{CONNECT_DEADLINE, POLL_INTERVAL, WRITE_DEADLINE};

/// Durations are written the humantime way: "5s", "1m 30s".
mod human_duration {
    use std::time::Duration;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(de::Error::custom)
    }
}

fn default_name() -> String {
    String::from("Bookoo Scale")
}

fn default_is_valid_scale() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    POLL_INTERVAL
}

fn default_connect_timeout() -> Duration {
    CONNECT_DEADLINE
}

fn default_command_timeout() -> Duration {
    WRITE_DEADLINE
}

/// Everything needed to bridge one scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleConfig {
    /// Bluetooth address, or the advertised name on platforms hiding addresses.
    #[serde(default)]
    pub address: String,

    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_is_valid_scale")]
    pub is_valid_scale: bool,

    #[serde(default = "default_poll_interval", with = "human_duration")]
    pub poll_interval: Duration,

    #[serde(default = "default_connect_timeout", with = "human_duration")]
    pub connect_timeout: Duration,

    #[serde(default = "default_command_timeout", with = "human_duration")]
    pub command_timeout: Duration,
}

impl ScaleConfig {
    pub fn new(address: impl Into<String>) -> Self {
        ScaleConfig {
            address: address.into(),
            ..Default::default()
        }
    }
}

impl Default for ScaleConfig {
    fn default() -> Self {
        ScaleConfig {
            address: String::new(),
            name: default_name(),
            is_valid_scale: default_is_valid_scale(),
            poll_interval: default_poll_interval(),
            connect_timeout: default_connect_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}
