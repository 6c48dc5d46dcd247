// Transport seam between the link and a BLE stack
//
// Calls go out through `Transport`; everything asynchronous (discovery,
// connection, write completion, notifications) comes back as `LinkEvent`s
// that the owner feeds into `PeripheralLink::handle_event` in arrival order.

use uuid::Uuid;

/// Opaque device identifier as reported by the transport's discovery
pub type DeviceId = String;

/// Tags one outbound write so its completion can be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriteId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    Base64,
}

/// One characteristic write handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub id: WriteId,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub payload: String,
    pub encoding: PayloadEncoding,
    pub with_response: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    DeviceDiscovered {
        id: DeviceId,
        name: Option<String>,
        rssi: Option<i16>,
    },
    Connected,
    Disconnected {
        reason: Option<String>,
    },
    WriteComplete(WriteId),
    Notification {
        service: Uuid,
        characteristic: Uuid,
        /// Base64-encoded characteristic value
        payload: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("BLE adapter unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Characteristic {characteristic} not found on service {service}")]
    CharacteristicNotFound { service: Uuid, characteristic: Uuid },

    #[error("Write error: {0}")]
    Write(String),

    #[error("Not connected")]
    NotConnected,
}

/// Discovery/connect/write/notify operations the link relies on.
///
/// Implementations must not block: long-running work is started here and
/// its result reported later as a `LinkEvent`.
pub trait Transport {
    /// Start discovery filtered to devices advertising any of `services`
    fn discover(&mut self, services: &[Uuid]) -> Result<(), TransportError>;

    /// Start connecting to a discovered device; success arrives as `LinkEvent::Connected`
    fn connect(&mut self, device: &str) -> Result<(), TransportError>;

    /// Drop the connection (no-op when not connected)
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Start a write; completion arrives as `LinkEvent::WriteComplete(request.id)`
    fn write(&mut self, request: WriteRequest) -> Result<(), TransportError>;

    /// Enable notifications; values arrive as `LinkEvent::Notification`
    fn subscribe(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        persistent: bool,
    ) -> Result<(), TransportError>;

    /// Tear the connection down and report `reason` as the cause upstream
    fn fail_with_reason(&mut self, reason: &str);
}
