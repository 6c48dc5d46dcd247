// Peripheral link: one connection to one J1 robot
//
// Owns the connection state, the single-flight send gate, the sensor watchdog
// and the latest decoded sensor frame. All input is explicit: method calls
// from the owner, `LinkEvent`s from the transport and `poll(now)` for timers.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::gate::SendGate;
use super::transport::{
    LinkEvent, PayloadEncoding, Transport, TransportError, WriteId, WriteRequest,
};
use super::watchdog::{Watchdog, WatchdogState};
use crate::config::{DATA_STOPPED_REASON, SEND_BUSY_TIMEOUT, WATCHDOG_TIMEOUT};
use crate::protocol::uuids::{ADVERTISED_SERVICES, SENSOR_DATA_CHAR, SENSOR_NOTIFY_SERVICE};
use crate::protocol::{
    Direction, FrameError, MotorCommand, SensorFrame, ServoCommand, ServoSelector, to_base64,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connected,
}

/// What happened to a send request. Dropped commands are never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(WriteId),
    DroppedDisconnected,
    DroppedBusy,
}

/// Failures detected by the link itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFailure {
    DataStopped,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cannot {op} while {state:?}")]
    InvalidState {
        op: &'static str,
        state: ConnectionState,
    },
}

pub struct PeripheralLink<T: Transport> {
    transport: T,
    state: ConnectionState,
    gate: SendGate,
    watchdog: Watchdog,
    last_frame: SensorFrame,
    frames_received: u64,
    frames_rejected: u64,
}

impl<T: Transport> PeripheralLink<T> {
    pub fn new(transport: T) -> Self {
        Self::with_timeouts(transport, WATCHDOG_TIMEOUT, SEND_BUSY_TIMEOUT)
    }

    pub fn with_timeouts(transport: T, watchdog_timeout: Duration, send_busy_timeout: Duration) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            gate: SendGate::new(send_busy_timeout),
            watchdog: Watchdog::new(watchdog_timeout),
            last_frame: SensorFrame::default(),
            frames_received: 0,
            frames_rejected: 0,
        }
    }

    // === Connection management ===

    /// Start discovery for J1 devices, dropping any current connection first
    pub fn scan(&mut self) -> Result<(), LinkError> {
        if self.state == ConnectionState::Connected || self.transport.is_connected() {
            self.disconnect();
        }

        info!("Scanning for J1 devices...");
        self.transport.discover(&ADVERTISED_SERVICES)?;
        self.state = ConnectionState::Scanning;
        Ok(())
    }

    /// Connect to a device found by `scan`
    pub fn connect(&mut self, device: &str) -> Result<(), LinkError> {
        if self.state != ConnectionState::Scanning {
            return Err(LinkError::InvalidState {
                op: "connect",
                state: self.state,
            });
        }

        info!("Connecting to {}", device);
        self.transport.connect(device)?;
        Ok(())
    }

    /// Tear down the connection and cancel all timers. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected || self.transport.is_connected() {
            info!("Disconnecting");
            self.transport.disconnect();
        }
        self.reset();
    }

    /// True only while the transport reports an active connection
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn reset(&mut self) {
        self.watchdog.cancel();
        self.gate.reset();
        self.state = ConnectionState::Disconnected;
    }

    // === Transport events ===

    /// Apply one transport event. Events must be fed in arrival order.
    pub fn handle_event(&mut self, event: LinkEvent, now: Instant) -> Result<(), LinkError> {
        match event {
            LinkEvent::DeviceDiscovered { id, name, rssi } => {
                debug!("Discovered {} (name={:?}, rssi={:?})", id, name, rssi);
                Ok(())
            }
            LinkEvent::Connected => self.on_connect(now),
            LinkEvent::Disconnected { reason } => {
                if self.state != ConnectionState::Disconnected {
                    match reason {
                        Some(reason) => warn!("Link lost: {}", reason),
                        None => info!("Link closed by transport"),
                    }
                }
                self.reset();
                Ok(())
            }
            LinkEvent::WriteComplete(id) => {
                if !self.gate.complete(id) {
                    debug!("Ignoring completion for released write {:?}", id);
                }
                Ok(())
            }
            LinkEvent::Notification {
                service,
                characteristic,
                payload,
            } => {
                if characteristic != SENSOR_DATA_CHAR {
                    debug!("Ignoring notification from {}/{}", service, characteristic);
                    return Ok(());
                }
                if let Err(e) = self.on_notification(&payload, now) {
                    warn!("Dropping sensor frame: {}", e);
                }
                Ok(())
            }
        }
    }

    fn on_connect(&mut self, now: Instant) -> Result<(), LinkError> {
        if self.state == ConnectionState::Disconnected {
            // Disconnect was requested while the connection was being set up
            warn!("Connection completed after disconnect, closing it");
            self.transport.disconnect();
            return Ok(());
        }

        info!("Connected, subscribing to sensor stream");
        if let Err(e) = self
            .transport
            .subscribe(SENSOR_NOTIFY_SERVICE, SENSOR_DATA_CHAR, true)
        {
            self.disconnect();
            return Err(e.into());
        }

        self.state = ConnectionState::Connected;
        self.watchdog.arm(now);
        Ok(())
    }

    /// Decode one sensor notification and refresh the watchdog.
    ///
    /// Malformed frames leave the cached frame and the watchdog untouched.
    /// Returns `Ok(None)` for frames that arrive while not connected.
    pub fn on_notification(
        &mut self,
        payload: &str,
        now: Instant,
    ) -> Result<Option<SensorFrame>, FrameError> {
        if self.state != ConnectionState::Connected {
            debug!("Sensor frame while {:?}, ignoring", self.state);
            return Ok(None);
        }

        let frame = SensorFrame::decode_base64(payload).inspect_err(|_| {
            self.frames_rejected += 1;
        })?;

        self.last_frame = frame;
        self.frames_received += 1;
        self.watchdog.arm(now);
        Ok(Some(frame))
    }

    // === Timers ===

    /// Check the send fallback and the watchdog against `now`
    pub fn poll(&mut self, now: Instant) -> Option<LinkFailure> {
        if let Some(id) = self.gate.expire(now) {
            warn!("Write {:?} never completed, releasing send gate", id);
        }

        if self.watchdog.check(now) {
            warn!(
                "No sensor data for {}ms, dropping link",
                self.watchdog.timeout().as_millis()
            );
            self.transport.fail_with_reason(DATA_STOPPED_REASON);
            self.gate.reset();
            self.state = ConnectionState::Disconnected;
            return Some(LinkFailure::DataStopped);
        }

        None
    }

    // === Commands ===

    /// Write `bytes` unless disconnected or another write is in flight
    pub fn send(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        bytes: &[u8],
        now: Instant,
    ) -> Result<SendOutcome, LinkError> {
        if !self.is_connected() {
            return Ok(SendOutcome::DroppedDisconnected);
        }
        let Some(id) = self.gate.begin(now) else {
            debug!("Send gate busy, dropping write to {}", characteristic);
            return Ok(SendOutcome::DroppedBusy);
        };

        let request = WriteRequest {
            id,
            service,
            characteristic,
            payload: to_base64(bytes),
            encoding: PayloadEncoding::Base64,
            with_response: false,
        };

        if let Err(e) = self.transport.write(request) {
            self.gate.reset();
            return Err(e.into());
        }
        Ok(SendOutcome::Sent(id))
    }

    pub fn set_motor(
        &mut self,
        left: u32,
        right: u32,
        direction: Direction,
        now: Instant,
    ) -> Result<SendOutcome, LinkError> {
        let payload = MotorCommand::new(left, right, direction).encode();
        let (service, characteristic) = MotorCommand::target();
        debug!("Motor: left={}, right={}, {:?}", left, right, direction);
        self.send(service, characteristic, &payload, now)
    }

    /// Stop both motors even if another write is still in flight.
    /// The outstanding write's completion is then ignored as stale.
    pub fn force_stop(&mut self, now: Instant) -> Result<SendOutcome, LinkError> {
        if let Some(id) = self.gate.in_flight() {
            debug!("Releasing write {:?} for stop", id);
            self.gate.reset();
        }
        self.set_motor(0, 0, Direction::Stop, now)
    }

    pub fn set_servo(
        &mut self,
        angle: u32,
        servo: ServoSelector,
        now: Instant,
    ) -> Result<SendOutcome, LinkError> {
        let payload = ServoCommand::new(angle, servo).encode();
        let (service, characteristic) = ServoCommand::target();
        debug!("Servo: {:?} -> {} deg", servo, angle);
        self.send(service, characteristic, &payload, now)
    }

    // === Accessors ===

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_frame(&self) -> SensorFrame {
        self.last_frame
    }

    pub fn is_send_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn send_busy_deadline(&self) -> Option<Instant> {
        self.gate.deadline()
    }

    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog.deadline()
    }

    pub fn watchdog_state(&self) -> WatchdogState {
        self.watchdog.state()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: Transport> Drop for PeripheralLink<T> {
    fn drop(&mut self) {
        // Leave no live connection behind the dropped link
        if self.state != ConnectionState::Disconnected {
            self.transport.disconnect();
        }
    }
}
