use std::time::Duration;
use uuid::Uuid;

/**
 * How often to check the connection status / attempt to reconnect.
 */
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/**
 * How long a single connect attempt (scan, connect, discover, subscribe) may take.
 */
pub const CONNECT_DEADLINE: Duration = Duration::from_secs(15);

/**
 * How long scanning for the configured peripheral may take within a connect attempt.
 */
pub const SCAN_WINDOW: Duration = Duration::from_secs(4);

/**
 * How often the adapters are queried for peripherals while scanning.
 */
pub const SCAN_POLL_DELAY: Duration = Duration::from_millis(250);

/**
 * How long the transport may take to report whether a connected link is still up.
 */
pub const IS_CONNECTED_DEADLINE: Duration = Duration::from_millis(2000);

/**
 * How long a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: Duration = Duration::from_secs(3);

/**
 * Capacity of the broadcast channel carrying DeviceEvents to observers.
 */
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/**
 * The UUID of the Bluetooth BLE service of the Bookoo scale (0x0FFE)
 */
pub const SCALE_SERVICE: Uuid = Uuid::from_u128(0x00000ffe_0000_1000_8000_00805f9b34fb);

/**
 * The characteristic the scale sends weight frames on (0xFF11)
 */
pub const WEIGHT_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ff11_0000_1000_8000_00805f9b34fb);

/**
 * The characteristic commands are written to (0xFF12)
 */
pub const COMMAND_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ff12_0000_1000_8000_00805f9b34fb);

pub const FRAME_PRODUCT: u8 = 0x03;
pub const FRAME_TYPE_WEIGHT: u8 = 0x0B;
pub const FRAME_TYPE_COMMAND: u8 = 0x0A;
pub const WEIGHT_FRAME_LEN: usize = 20;

pub const OP_TARE: u8 = 0x01;
pub const OP_BEEP_LEVEL: u8 = 0x02;
pub const OP_AUTO_OFF: u8 = 0x03;
pub const OP_START_TIMER: u8 = 0x04;
pub const OP_STOP_TIMER: u8 = 0x05;
pub const OP_RESET_TIMER: u8 = 0x06;
pub const OP_TARE_AND_START: u8 = 0x07;
pub const OP_FLOW_SMOOTHING: u8 = 0x08;

pub const BEEP_LEVEL_RANGE: std::ops::RangeInclusive<u8> = 0..=5;
pub const AUTO_OFF_RANGE: std::ops::RangeInclusive<u16> = 1..=30;

/**
 * XOR of all bytes, the checksum used by both weight and command frames.
 */
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}
