// In-process J1 simulator
//
// Behaves like a robot reachable over BLE: it shows up in discovery,
// accepts one connection, acknowledges writes and streams sensor frames on
// a fixed interval once subscribed. Writes to the motor characteristic
// steer the simulated ultrasonic reading so teleop has something to show.
//
// Faults can be injected through `SimHandle`: silence the sensor stream,
// stall write completions, or drop the connection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

use super::lock;
use crate::link::{LinkEvent, Transport, TransportError, WriteRequest};
use crate::protocol::uuids::{MOTOR_SERVICE, MOTOR_SET_CHAR, SENSOR_DATA_CHAR};
use crate::protocol::{Direction, SensorFrame, from_base64, to_base64};

pub const SIM_DEVICE_ID: &str = "sim-j1";
pub const SIM_DEVICE_NAME: &str = "J1-SIM";

/// Default interval between streamed sensor frames
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);

const START_DISTANCE: u16 = 150; // cm
const MIN_DISTANCE: u16 = 5;
const MAX_DISTANCE: u16 = 400;

#[derive(Debug)]
struct SimState {
    connected: bool,
    // Bumped on every (re)subscribe or disconnect so old stream tasks exit
    session: u64,
    silenced: bool,
    stall_writes: bool,
    writes: Vec<WriteRequest>,
    failures: Vec<String>,
    tick: u64,
    distance: u16,
    speed: u32,
    direction: u8,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            connected: false,
            session: 0,
            silenced: false,
            stall_writes: false,
            writes: Vec::new(),
            failures: Vec::new(),
            tick: 0,
            distance: START_DISTANCE,
            speed: 0,
            direction: Direction::Stop.code(),
        }
    }
}

impl SimState {
    fn apply_motor_payload(&mut self, bytes: &[u8]) {
        if bytes.len() < 9 {
            return;
        }
        let left = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let right = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        self.speed = left.max(right);
        self.direction = bytes[8];
    }

    fn next_frame(&mut self) -> SensorFrame {
        self.tick += 1;
        let step = u16::try_from(self.speed / 10).unwrap_or(u16::MAX).max(1);

        if self.direction == Direction::Forward.code() && self.speed > 0 {
            self.distance = self.distance.saturating_sub(step).max(MIN_DISTANCE);
        } else if self.direction == Direction::TurnLeft.code()
            || self.direction == Direction::TurnRight.code()
        {
            // Turning away from an obstacle opens the view up again
            self.distance = self.distance.saturating_add(step).min(MAX_DISTANCE);
        }

        SensorFrame {
            ultrasonic_distance: self.distance,
            infra_red_1: (self.distance < 20) as u8,
            infra_red_2: (self.distance < 10) as u8,
            sound_level: ((self.tick * 7) % 100) as u8,
        }
    }
}

fn sensor_notification(frame: &SensorFrame) -> LinkEvent {
    LinkEvent::Notification {
        service: MOTOR_SERVICE,
        characteristic: SENSOR_DATA_CHAR,
        payload: to_base64(&frame.encode()),
    }
}

/// Simulated J1 implementing `Transport`
pub struct SimulatedRobot {
    events: UnboundedSender<LinkEvent>,
    state: Arc<Mutex<SimState>>,
    frame_interval: Duration,
}

impl SimulatedRobot {
    pub fn new(events: UnboundedSender<LinkEvent>) -> Self {
        Self {
            events,
            state: Arc::new(Mutex::new(SimState::default())),
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }

    /// Interval between streamed frames; zero disables the stream task so
    /// tests can push frames by hand through `SimHandle::push_frame`
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            events: self.events.clone(),
            state: Arc::clone(&self.state),
        }
    }

    fn emit(&self, event: LinkEvent) {
        // The receiver only goes away when the runtime is shutting down
        let _ = self.events.send(event);
    }

    fn spawn_stream(&self, session: u64) {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let mut ticker = tokio::time::interval(self.frame_interval);

        tokio::spawn(async move {
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                let frame = {
                    let mut s = lock(&state);
                    if s.session != session || !s.connected {
                        break;
                    }
                    if s.silenced {
                        continue;
                    }
                    s.next_frame()
                };
                if events.send(sensor_notification(&frame)).is_err() {
                    break;
                }
            }
            debug!("Simulated sensor stream {} stopped", session);
        });
    }

    fn close(&self) {
        let mut s = lock(&self.state);
        s.connected = false;
        s.session += 1;
    }
}

impl Transport for SimulatedRobot {
    fn discover(&mut self, services: &[Uuid]) -> Result<(), TransportError> {
        if !services.is_empty() && !services.contains(&MOTOR_SERVICE) {
            debug!("Simulated robot does not match scan filter");
            return Ok(());
        }
        self.emit(LinkEvent::DeviceDiscovered {
            id: SIM_DEVICE_ID.to_string(),
            name: Some(SIM_DEVICE_NAME.to_string()),
            rssi: Some(-50),
        });
        Ok(())
    }

    fn connect(&mut self, device: &str) -> Result<(), TransportError> {
        if device != SIM_DEVICE_ID {
            return Err(TransportError::UnknownDevice(device.to_string()));
        }
        lock(&self.state).connected = true;
        info!("Simulated robot connected");
        self.emit(LinkEvent::Connected);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.close();
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn write(&mut self, request: WriteRequest) -> Result<(), TransportError> {
        let stall = {
            let mut s = lock(&self.state);
            if !s.connected {
                return Err(TransportError::NotConnected);
            }
            if request.characteristic == MOTOR_SET_CHAR {
                let bytes =
                    from_base64(&request.payload).map_err(|e| TransportError::Write(e.to_string()))?;
                s.apply_motor_payload(&bytes);
            }
            s.writes.push(request.clone());
            s.stall_writes
        };

        if !stall {
            self.emit(LinkEvent::WriteComplete(request.id));
        }
        Ok(())
    }

    fn subscribe(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        _persistent: bool,
    ) -> Result<(), TransportError> {
        if characteristic != SENSOR_DATA_CHAR {
            return Err(TransportError::CharacteristicNotFound {
                service,
                characteristic,
            });
        }

        let session = {
            let mut s = lock(&self.state);
            if !s.connected {
                return Err(TransportError::NotConnected);
            }
            s.session += 1;
            s.session
        };

        if !self.frame_interval.is_zero() {
            self.spawn_stream(session);
        }
        Ok(())
    }

    fn fail_with_reason(&mut self, reason: &str) {
        lock(&self.state).failures.push(reason.to_string());
        self.close();
        self.emit(LinkEvent::Disconnected {
            reason: Some(reason.to_string()),
        });
    }
}

/// Test/inspection handle onto a `SimulatedRobot`
#[derive(Clone)]
pub struct SimHandle {
    events: UnboundedSender<LinkEvent>,
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    pub fn writes(&self) -> Vec<WriteRequest> {
        lock(&self.state).writes.clone()
    }

    pub fn failures(&self) -> Vec<String> {
        lock(&self.state).failures.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Stop (or resume) streaming sensor frames while staying connected
    pub fn set_silenced(&self, silenced: bool) {
        lock(&self.state).silenced = silenced;
    }

    /// Withhold write completions
    pub fn set_stall_writes(&self, stall: bool) {
        lock(&self.state).stall_writes = stall;
    }

    /// Deliver one frame immediately
    pub fn push_frame(&self, frame: &SensorFrame) {
        let _ = self.events.send(sensor_notification(frame));
    }

    /// Deliver an arbitrary raw payload on the sensor characteristic
    pub fn push_raw(&self, bytes: &[u8]) {
        let _ = self.events.send(LinkEvent::Notification {
            service: MOTOR_SERVICE,
            characteristic: SENSOR_DATA_CHAR,
            payload: to_base64(bytes),
        });
    }

    /// Simulate the robot going out of range
    pub fn drop_connection(&self, reason: &str) {
        {
            let mut s = lock(&self.state);
            s.connected = false;
            s.session += 1;
        }
        let _ = self.events.send(LinkEvent::Disconnected {
            reason: Some(reason.to_string()),
        });
    }
}
