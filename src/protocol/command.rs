// Outbound command payloads
//
// Motor:  [left: u32 BE][right: u32 BE][direction: u8]   (9 bytes)
// Servo:  [angle: u32 BE][selector: u8]                  (5 bytes)
//
// No range checks happen here; callers clamp speed to 0..=100 and angle to
// 0..=180 before encoding.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::uuids::{MOTOR_SERVICE, MOTOR_SERVO_CHAR, MOTOR_SET_CHAR};

pub const MOTOR_PAYLOAD_LEN: usize = 9;
pub const SERVO_PAYLOAD_LEN: usize = 5;

/// Drive direction codes understood by the firmware
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward = 0x01,
    Stop = 0x03,
    // Turns drive one wheel only; the other speed is sent as zero
    TurnLeft = 0x04,
    TurnRight = 0x05,
}

impl Direction {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Which of the two servo headers to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServoSelector {
    Servo1,
    Servo2,
}

impl ServoSelector {
    /// Menu label used by the block front end for the first servo
    pub const SERVO_1_LABEL: &'static str = "Servo 1";

    /// Anything other than the first servo's label selects servo 2
    pub fn from_menu_value(value: &str) -> Self {
        if value == Self::SERVO_1_LABEL {
            ServoSelector::Servo1
        } else {
            ServoSelector::Servo2
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ServoSelector::Servo1 => 0x01,
            ServoSelector::Servo2 => 0x02,
        }
    }
}

/// Speeds for both wheels plus a direction code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorCommand {
    pub left: u32,
    pub right: u32,
    pub direction: Direction,
}

impl MotorCommand {
    pub fn new(left: u32, right: u32, direction: Direction) -> Self {
        Self {
            left,
            right,
            direction,
        }
    }

    pub fn encode(&self) -> [u8; MOTOR_PAYLOAD_LEN] {
        let mut payload = [0u8; MOTOR_PAYLOAD_LEN];
        payload[0..4].copy_from_slice(&self.left.to_be_bytes());
        payload[4..8].copy_from_slice(&self.right.to_be_bytes());
        payload[8] = self.direction.code();
        payload
    }

    /// (service, characteristic) the payload is written to
    pub fn target() -> (Uuid, Uuid) {
        (MOTOR_SERVICE, MOTOR_SET_CHAR)
    }
}

/// Servo angle in degrees and servo selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoCommand {
    pub angle: u32,
    pub servo: ServoSelector,
}

impl ServoCommand {
    pub fn new(angle: u32, servo: ServoSelector) -> Self {
        Self { angle, servo }
    }

    pub fn encode(&self) -> [u8; SERVO_PAYLOAD_LEN] {
        let mut payload = [0u8; SERVO_PAYLOAD_LEN];
        payload[0..4].copy_from_slice(&self.angle.to_be_bytes());
        payload[4] = self.servo.code();
        payload
    }

    pub fn target() -> (Uuid, Uuid) {
        (MOTOR_SERVICE, MOTOR_SERVO_CHAR)
    }
}
