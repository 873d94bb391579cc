use crate::device::constants::{
    xor_checksum, AUTO_OFF_RANGE, BEEP_LEVEL_RANGE, FRAME_PRODUCT, FRAME_TYPE_WEIGHT, WEIGHT_FRAME_LEN,
};
use crate::device::types::{DeviceStateDelta, Unit};
use crate::error::DecodeError;

/// Turns one raw notification payload into the fields it carries.
pub trait FrameDecoder: Send + Sync + 'static {
    fn decode(&self, frame: &[u8]) -> Result<DeviceStateDelta, DecodeError>;
}

/**
 * Decoder for the 20 byte weight frame of Bookoo scales:
 *
 * | offset | meaning                                   |
 * |--------|-------------------------------------------|
 * | 0..2   | header `03 0B`                            |
 * | 2..5   | timer, milliseconds (big endian)          |
 * | 5      | unit                                      |
 * | 6      | weight sign (`-` is negative)             |
 * | 7..10  | weight, centigrams (big endian)           |
 * | 10     | flow rate sign                            |
 * | 11..13 | flow rate, 1/100 g/s (big endian)         |
 * | 13     | battery percent                           |
 * | 14..16 | standby time, minutes (big endian)        |
 * | 16     | buzzer level                              |
 * | 17     | flow smoothing enabled                    |
 * | 19     | xor of bytes 0..19                        |
 */
#[derive(Debug, Clone, Copy, Default)]
pub struct BookooDecoder;

const SIGN_NEGATIVE: u8 = b'-';

fn be_uint(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0, |acc, b| (acc << 8) | u32::from(*b))
}

fn signed(sign: u8, magnitude: u32, scale: f64) -> f64 {
    let value = f64::from(magnitude) / scale;
    if sign == SIGN_NEGATIVE { -value } else { value }
}

impl FrameDecoder for BookooDecoder {
    fn decode(&self, frame: &[u8]) -> Result<DeviceStateDelta, DecodeError> {
        if frame.len() < WEIGHT_FRAME_LEN {
            return Err(DecodeError::TooShort(frame.len()));
        }
        if frame[0] != FRAME_PRODUCT || frame[1] != FRAME_TYPE_WEIGHT {
            return Err(DecodeError::BadHeader(frame[0], frame[1]));
        }

        let expected = xor_checksum(&frame[..WEIGHT_FRAME_LEN - 1]);
        let actual = frame[WEIGHT_FRAME_LEN - 1];
        if expected != actual {
            return Err(DecodeError::BadChecksum { expected, actual });
        }

        let standby = be_uint(&frame[14..16]) as u16;
        let buzzer = frame[16];

        // fields the scale reports out of range are left out rather than clamped
        Ok(DeviceStateDelta {
            weight: Some(signed(frame[6], be_uint(&frame[7..10]), 100.0)),
            flow_rate: Some(signed(frame[10], be_uint(&frame[11..13]), 100.0)),
            timer_seconds: Some(f64::from(be_uint(&frame[2..5])) / 1000.0),
            battery_percent: Some(frame[13]).filter(|battery| *battery <= 100),
            buzzer_level: Some(buzzer).filter(|level| BEEP_LEVEL_RANGE.contains(level)),
            standby_minutes: Some(standby).filter(|minutes| AUTO_OFF_RANGE.contains(minutes)),
            flow_smoothing_enabled: Some(frame[17] != 0),
            unit: Some(Unit::from_byte(frame[5])),
        })
    }
}
