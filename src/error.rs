use std::io;
use std::str::Utf8Error;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("No scale address configured")]
    MissingAddress,
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Device {address} is not a supported scale model")]
    UnsupportedDevice { address: String },

    #[error("Poll interval must be greater than zero")]
    InvalidPollInterval,

    #[error("Failed to set up bluetooth transport: {source}")]
    Device { #[from] source: DeviceError },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start bridge (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start bridge (setup): {source}")]
    SetupError { #[from] source: SetupError },

    #[error("Failed to start bridge (runtime): {source}")]
    Runtime { #[from] source: io::Error },
}

/// Connection-layer failures. These never reach observers; the session
/// manager logs them and retries on the next tick.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("Device {address} was not found")]
    DeviceNotFound { address: String },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Device operation timed out")]
    Timeout,

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Connect abandoned, bridge is shutting down")]
    Cancelled,
}

/// Command-layer failures, surfaced to the caller as a failed action.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Scale is not connected")]
    NotConnected,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timed out waiting for the scale to accept the command")]
    Timeout,

    #[error("Bridge is shutting down")]
    ShuttingDown,

    #[error("Failed to write command: {source}")]
    Transport { #[from] source: DeviceError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame too short: {0} bytes")]
    TooShort(usize),

    #[error("Unexpected frame header {0:#04x} {1:#04x}")]
    BadHeader(u8, u8),

    #[error("Frame checksum mismatch (expected {expected:#04x}, got {actual:#04x})")]
    BadChecksum { expected: u8, actual: u8 },
}
