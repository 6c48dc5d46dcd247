// GATT identifiers exposed by the J1 firmware
//
// The three services advertise 16-bit ids; characteristics use vendor
// 128-bit ids sharing one base.

use uuid::Uuid;

/// Bluetooth SIG base UUID (0000xxxx-0000-1000-8000-00805f9b34fb)
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned id into a full 128-bit UUID
pub const fn short_uuid(id: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((id as u128) << 96))
}

pub const MOTOR_SERVICE: Uuid = short_uuid(0xEE05);
pub const SENSOR_SERVICE: Uuid = short_uuid(0xEE07);
pub const MISC_SERVICE: Uuid = short_uuid(0xEE08);

/// Motor speed/direction (write)
pub const MOTOR_SET_CHAR: Uuid = Uuid::from_u128(0x34443d33_3356_11e9_b210_d663bd873d93);

/// Servo angle (write)
pub const MOTOR_SERVO_CHAR: Uuid = Uuid::from_u128(0x34443d34_3356_11e9_b210_d663bd873d93);

/// Sensor frame (notify)
pub const SENSOR_DATA_CHAR: Uuid = Uuid::from_u128(0x34443d3c_3356_11e9_b210_d663bd873d93);

/// Services a J1 advertises; discovery filters on these
pub const ADVERTISED_SERVICES: [Uuid; 3] = [MOTOR_SERVICE, SENSOR_SERVICE, MISC_SERVICE];

// The firmware serves the sensor characteristic through the motor service
// handle, so subscriptions address it there rather than under SENSOR_SERVICE.
pub const SENSOR_NOTIFY_SERVICE: Uuid = MOTOR_SERVICE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            MOTOR_SERVICE.to_string(),
            "0000ee05-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            MISC_SERVICE.to_string(),
            "0000ee08-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_vendor_characteristics() {
        assert_eq!(
            SENSOR_DATA_CHAR.to_string(),
            "34443d3c-3356-11e9-b210-d663bd873d93"
        );
        assert_ne!(MOTOR_SET_CHAR, MOTOR_SERVO_CHAR);
    }
}
