// End-to-end link behaviour against the in-process simulated J1.

use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, UnboundedReceiver};

use joyworks_link::ble::simulated::{DEFAULT_FRAME_INTERVAL, SIM_DEVICE_ID};
use joyworks_link::ble::{SimHandle, SimulatedRobot};
use joyworks_link::config::{DATA_STOPPED_REASON, RuntimeConfig};
use joyworks_link::link::{ConnectionState, LinkEvent};
use joyworks_link::messages::{BlockCommand, LinkHealth, SensorReading};
use joyworks_link::protocol::SensorFrame;
use joyworks_link::protocol::uuids::{MOTOR_SERVICE, MOTOR_SERVO_CHAR, MOTOR_SET_CHAR};
use joyworks_link::runtime::Runtime;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

struct Rig {
    runtime: Runtime<SimulatedRobot>,
    robot: SimHandle,
    events: UnboundedReceiver<LinkEvent>,
}

impl Rig {
    /// Robot with the frame stream disabled; frames are pushed by hand
    fn new() -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let robot = SimulatedRobot::new(tx).with_frame_interval(Duration::ZERO);
        let handle = robot.handle();
        Self {
            runtime: Runtime::new(robot, RuntimeConfig::default()),
            robot: handle,
            events,
        }
    }

    fn pump(&mut self, now: Instant) {
        while let Ok(event) = self.events.try_recv() {
            self.runtime.on_transport_event(event, now);
        }
    }

    fn connected(now: Instant) -> Self {
        let mut rig = Self::new();
        rig.runtime.start_scan(now).unwrap();
        rig.pump(now);
        assert_eq!(rig.runtime.link().state(), ConnectionState::Connected);
        rig
    }
}

#[test]
fn scan_discovers_and_auto_connects() {
    let t0 = Instant::now();
    let mut rig = Rig::new();

    rig.runtime.start_scan(t0).unwrap();
    assert_eq!(rig.runtime.tick(t0), LinkHealth::Scanning);

    rig.pump(t0);
    assert!(rig.robot.is_connected());
    assert!(rig.runtime.link().is_connected());
    assert_eq!(rig.runtime.tick(t0), LinkHealth::Ok);
    assert_eq!(rig.runtime.link().watchdog_deadline(), Some(t0 + ms(4500)));
}

#[test]
fn blocks_reach_the_robot_as_base64_writes() {
    let t0 = Instant::now();
    let mut rig = Rig::connected(t0);

    rig.runtime.on_command(BlockCommand::MoveForward { speed: 100.0 }, t0);
    rig.pump(t0);
    rig.runtime.on_command(
        BlockCommand::MoveServo {
            servo: "Servo 1".to_string(),
            angle: 90.0,
        },
        t0,
    );
    rig.pump(t0);
    rig.runtime.on_command(BlockCommand::StopMotor, t0);

    let writes = rig.robot.writes();
    assert_eq!(writes.len(), 3);

    assert_eq!(writes[0].service, MOTOR_SERVICE);
    assert_eq!(writes[0].characteristic, MOTOR_SET_CHAR);
    assert_eq!(writes[0].payload, "AAAAZAAAAGQB");
    assert!(!writes[0].with_response);

    assert_eq!(writes[1].characteristic, MOTOR_SERVO_CHAR);
    assert_eq!(writes[1].payload, "AAAAWgE=");

    assert_eq!(writes[2].payload, "AAAAAAAAAAAD");
}

#[test]
fn stalled_write_is_released_by_fallback() {
    let t0 = Instant::now();
    let mut rig = Rig::connected(t0);
    rig.robot.set_stall_writes(true);

    rig.runtime.on_command(BlockCommand::MoveForward { speed: 50.0 }, t0);
    rig.runtime.on_command(BlockCommand::StopMotor, t0 + ms(1000));
    assert_eq!(rig.robot.writes().len(), 1);
    assert!(rig.runtime.link().is_send_busy());

    // Keep the sensor stream alive past the watchdog window
    rig.robot.push_frame(&SensorFrame::default());
    rig.pump(t0 + ms(4000));

    assert_eq!(rig.runtime.tick(t0 + ms(4999)), LinkHealth::Ok);
    assert!(rig.runtime.link().is_send_busy());
    rig.runtime.tick(t0 + ms(5000));
    assert!(!rig.runtime.link().is_send_busy());

    rig.runtime.on_command(BlockCommand::StopMotor, t0 + ms(5000));
    assert_eq!(rig.robot.writes().len(), 2);
}

#[test]
fn frames_update_readings_and_feed_watchdog() {
    let t0 = Instant::now();
    let mut rig = Rig::connected(t0);

    rig.robot.push_frame(&SensorFrame {
        ultrasonic_distance: 300,
        infra_red_1: 1,
        infra_red_2: 0,
        sound_level: 42,
    });
    rig.pump(t0 + ms(3000));

    assert_eq!(
        rig.runtime.reading(),
        SensorReading {
            ultra_sonic: 300,
            ir1: 1,
            ir2: 0,
            sound: 42
        }
    );
    assert_eq!(rig.runtime.link().get_ultra_sonic(), 300);
    assert_eq!(rig.runtime.link().get_sound(), 42);

    // Deadline moved to 3000 + 4500
    assert_eq!(rig.runtime.tick(t0 + ms(7499)), LinkHealth::Ok);
    assert_eq!(rig.runtime.tick(t0 + ms(7500)), LinkHealth::DataStopped);
}

#[test]
fn malformed_frame_keeps_last_reading_and_does_not_feed_watchdog() {
    let t0 = Instant::now();
    let mut rig = Rig::connected(t0);

    rig.robot.push_frame(&SensorFrame {
        ultrasonic_distance: 120,
        infra_red_1: 0,
        infra_red_2: 0,
        sound_level: 7,
    });
    rig.pump(t0 + ms(1000));

    rig.robot.push_raw(&[0x01, 0x02]);
    rig.pump(t0 + ms(3000));

    assert_eq!(rig.runtime.link().frames_rejected(), 1);
    assert_eq!(rig.runtime.reading().ultra_sonic, 120);
    assert_eq!(rig.runtime.tick(t0 + ms(5500)), LinkHealth::DataStopped);
}

#[test]
fn silent_robot_is_dropped_then_rescanned() {
    let t0 = Instant::now();
    let mut rig = Rig::connected(t0);

    assert_eq!(rig.runtime.tick(t0 + ms(4499)), LinkHealth::Ok);
    assert_eq!(rig.runtime.tick(t0 + ms(4500)), LinkHealth::DataStopped);
    assert_eq!(rig.robot.failures(), vec![DATA_STOPPED_REASON.to_string()]);
    assert!(!rig.robot.is_connected());

    // The watchdog fires only once
    rig.pump(t0 + ms(4500));
    assert_eq!(rig.robot.failures().len(), 1);

    // Next tick re-scans and the robot is picked up again
    assert_eq!(rig.runtime.tick(t0 + ms(4520)), LinkHealth::Scanning);
    rig.pump(t0 + ms(4520));
    assert_eq!(rig.runtime.tick(t0 + ms(4540)), LinkHealth::Ok);
}

#[test]
fn dropped_connection_discards_commands_until_reconnected() {
    let t0 = Instant::now();
    let mut rig = Rig::connected(t0);

    rig.robot.drop_connection("out of range");
    rig.pump(t0 + ms(100));
    assert_eq!(rig.runtime.link().state(), ConnectionState::Disconnected);
    assert_eq!(rig.runtime.link().watchdog_deadline(), None);

    rig.runtime.on_command(BlockCommand::MoveForward { speed: 40.0 }, t0 + ms(200));
    assert!(rig.robot.writes().is_empty());

    // Re-scan is rate limited from the initial scan at t0
    assert_eq!(rig.runtime.tick(t0 + ms(1000)), LinkHealth::Disconnected);
    assert_eq!(rig.runtime.tick(t0 + ms(2000)), LinkHealth::Scanning);
    rig.pump(t0 + ms(2000));
    assert!(rig.robot.is_connected());

    rig.runtime.on_command(BlockCommand::MoveForward { speed: 40.0 }, t0 + ms(2100));
    assert_eq!(rig.robot.writes().len(), 1);
}

#[test]
fn manual_connect_outside_scan_is_rejected() {
    let t0 = Instant::now();
    let config = RuntimeConfig {
        auto_connect: false,
        ..RuntimeConfig::default()
    };
    let (tx, mut events) = mpsc::unbounded_channel();
    let robot = SimulatedRobot::new(tx).with_frame_interval(Duration::ZERO);
    let handle = robot.handle();
    let mut runtime = Runtime::new(robot, config);

    runtime.on_command(
        BlockCommand::Connect {
            device: SIM_DEVICE_ID.to_string(),
        },
        t0,
    );
    assert!(!handle.is_connected());

    runtime.on_command(BlockCommand::Scan, t0);
    while let Ok(event) = events.try_recv() {
        runtime.on_transport_event(event, t0);
    }
    assert!(!handle.is_connected());

    runtime.on_command(
        BlockCommand::Connect {
            device: SIM_DEVICE_ID.to_string(),
        },
        t0,
    );
    while let Ok(event) = events.try_recv() {
        runtime.on_transport_event(event, t0);
    }
    assert!(handle.is_connected());
    assert_eq!(runtime.tick(t0), LinkHealth::Ok);
}

#[test]
fn shutdown_stops_motors_and_disconnects() {
    let t0 = Instant::now();
    let mut rig = Rig::connected(t0);

    rig.runtime.shutdown(t0);

    let writes = rig.robot.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].payload, "AAAAAAAAAAAD");
    assert!(!rig.robot.is_connected());
}

#[tokio::test]
async fn shutdown_stops_a_moving_robot_before_disconnecting() {
    let t0 = Instant::now();
    let mut rig = Rig::connected(t0);

    // Motion write still in flight when shutdown starts
    rig.robot.set_stall_writes(true);
    rig.runtime.on_command(BlockCommand::MoveForward { speed: 100.0 }, t0);
    rig.robot.set_stall_writes(false);
    assert!(rig.runtime.link().is_send_busy());

    let acked = rig.runtime.shutdown_gracefully(&mut rig.events, ms(500)).await;

    assert!(acked);
    let writes = rig.robot.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1].payload, "AAAAAAAAAAAD");
    assert!(!rig.robot.is_connected());
}

#[tokio::test(start_paused = true)]
async fn streamed_frames_keep_the_link_alive() {
    let (tx, mut events) = mpsc::unbounded_channel();
    let robot = SimulatedRobot::new(tx);
    let mut runtime = Runtime::new(robot, RuntimeConfig::default());

    let t0 = Instant::now();
    runtime.start_scan(t0).unwrap();
    while let Ok(event) = events.try_recv() {
        runtime.on_transport_event(event, t0);
    }

    tokio::time::sleep(DEFAULT_FRAME_INTERVAL * 5 + ms(50)).await;
    let later = t0 + ms(6000);
    while let Ok(event) = events.try_recv() {
        runtime.on_transport_event(event, later);
    }

    assert!(runtime.link().frames_received() >= 3);
    assert_eq!(runtime.tick(later), LinkHealth::Ok);
    assert!(runtime.reading().ultra_sonic > 0);
}
