// BLE link driver for the Joyworks J1 educational robot.
//
// The `link::PeripheralLink` owns one connection: it encodes motor and
// servo commands, decodes the 5-byte sensor frame, gates writes to one in
// flight and drops the link when the sensor stream goes silent. The
// `runtime` module bridges the link onto a Zenoh bus so block-style
// commands can drive the robot.

pub mod ble;
pub mod blocks;
pub mod config;
pub mod link;
pub mod messages;
pub mod protocol;
pub mod runtime;
