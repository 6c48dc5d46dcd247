// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::protocol::SensorFrame;

// Command from teleop/scripts -> runtime, one per block invocation
// Tagged by "op", e.g. {"op": "move_forward", "speed": 60}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BlockCommand {
    MoveForward { speed: f64 },
    TurnLeft { speed: f64 },
    TurnRight { speed: f64 },
    StopMotor,
    // `servo` is the menu label ("Servo 1" / "Servo 2")
    MoveServo { servo: String, angle: f64 },
    Scan,
    Connect { device: String },
    Disconnect,
}

// Latest sensor values runtime -> subscribers
// Defaults to zeros until the first frame arrives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SensorReading {
    pub ultra_sonic: u16,
    pub ir1: u8,
    pub ir2: u8,
    pub sound: u8,
}

impl From<&SensorFrame> for SensorReading {
    fn from(frame: &SensorFrame) -> Self {
        Self {
            ultra_sonic: frame.ultrasonic_distance,
            ir1: frame.infra_red_1,
            ir2: frame.infra_red_2,
            sound: frame.sound_level,
        }
    }
}

/// Link health published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkHealth {
    Ok,
    Scanning,
    Disconnected,
    DataStopped,
}
