// Inbound sensor frame
//
// Frame layout (5 bytes, notified on SENSOR_DATA_CHAR):
//   [0..2] ultrasonic distance, u16 little-endian
//   [2]    infrared 1
//   [3]    infrared 2
//   [4]    sound level
//
// Bytes past the fifth are ignored.

use serde::{Deserialize, Serialize};

use super::from_base64;

pub const SENSOR_FRAME_LEN: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Sensor frame too short: expected 5 bytes, got {len}")]
    TooShort { len: usize },

    #[error("Sensor payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// One decoded sensor snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorFrame {
    pub ultrasonic_distance: u16,
    pub infra_red_1: u8,
    pub infra_red_2: u8,
    pub sound_level: u8,
}

impl SensorFrame {
    /// Decode a raw frame. Short frames are rejected rather than padded.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < SENSOR_FRAME_LEN {
            return Err(FrameError::TooShort { len: bytes.len() });
        }

        Ok(Self {
            ultrasonic_distance: u16::from_le_bytes([bytes[0], bytes[1]]),
            infra_red_1: bytes[2],
            infra_red_2: bytes[3],
            sound_level: bytes[4],
        })
    }

    /// Decode a base64 notification payload
    pub fn decode_base64(payload: &str) -> Result<Self, FrameError> {
        let bytes = from_base64(payload)?;
        Self::decode(&bytes)
    }

    /// Inverse of `decode`, used by the simulated robot
    pub fn encode(&self) -> [u8; SENSOR_FRAME_LEN] {
        let [lo, hi] = self.ultrasonic_distance.to_le_bytes();
        [lo, hi, self.infra_red_1, self.infra_red_2, self.sound_level]
    }
}
