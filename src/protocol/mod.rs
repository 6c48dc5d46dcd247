// Joyworks J1 BLE wire protocol
//
// Provides:
// - GATT service / characteristic identifiers
// - Motor and servo command encoding (big-endian, fixed length)
// - Sensor notification decoding (fixed 5-byte frame)
// - Base64 payload helpers (the transport carries payloads as base64 text)

pub mod command;
pub mod sensor;
pub mod uuids;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub use command::{Direction, MotorCommand, ServoCommand, ServoSelector};
pub use sensor::{FrameError, SENSOR_FRAME_LEN, SensorFrame};

/// Encode raw bytes the way the transport expects them on a write
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 payload received from the transport
pub fn from_base64(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(payload)
}
