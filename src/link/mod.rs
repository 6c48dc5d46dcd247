// BLE link to a Joyworks J1 robot
//
// Provides:
// - The transport seam (calls out, events back in)
// - Single-flight write gate with a fallback release
// - Sensor-stream watchdog
// - The peripheral link state machine tying them together

mod gate;
mod peripheral;
pub mod transport;
pub mod watchdog;

pub use gate::SendGate;
pub use peripheral::{ConnectionState, LinkError, LinkFailure, PeripheralLink, SendOutcome};
pub use transport::{
    DeviceId, LinkEvent, PayloadEncoding, Transport, TransportError, WriteId, WriteRequest,
};
pub use watchdog::{Watchdog, WatchdogState};

#[cfg(test)]
pub(crate) use peripheral::tests as peripheral_tests;
