// Block-level operations on top of the peripheral link
//
// Arguments arrive as loosely typed numbers from the block front end; they are
// clamped and truncated here before reaching the encoder.

use std::time::Instant;

use crate::link::{LinkError, PeripheralLink, SendOutcome, Transport};
use crate::protocol::{Direction, ServoSelector};

pub const MAX_SPEED_PERCENT: f64 = 100.0;
pub const MAX_SERVO_ANGLE: f64 = 180.0;

/// Clamp to 0..=max and drop the fraction. NaN maps to 0.
fn clamp_to_u32(value: f64, max: f64) -> u32 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, max) as u32
}

pub fn clamp_speed(speed: f64) -> u32 {
    clamp_to_u32(speed, MAX_SPEED_PERCENT)
}

pub fn clamp_angle(angle: f64) -> u32 {
    clamp_to_u32(angle, MAX_SERVO_ANGLE)
}

impl<T: Transport> PeripheralLink<T> {
    pub fn move_forward(&mut self, speed: f64, now: Instant) -> Result<SendOutcome, LinkError> {
        let speed = clamp_speed(speed);
        self.set_motor(speed, speed, Direction::Forward, now)
    }

    pub fn turn_left(&mut self, speed: f64, now: Instant) -> Result<SendOutcome, LinkError> {
        self.set_motor(clamp_speed(speed), 0, Direction::TurnLeft, now)
    }

    pub fn turn_right(&mut self, speed: f64, now: Instant) -> Result<SendOutcome, LinkError> {
        self.set_motor(0, clamp_speed(speed), Direction::TurnRight, now)
    }

    pub fn stop_motor(&mut self, now: Instant) -> Result<SendOutcome, LinkError> {
        self.set_motor(0, 0, Direction::Stop, now)
    }

    pub fn move_servo(
        &mut self,
        servo: &str,
        angle: f64,
        now: Instant,
    ) -> Result<SendOutcome, LinkError> {
        self.set_servo(clamp_angle(angle), ServoSelector::from_menu_value(servo), now)
    }

    pub fn get_ultra_sonic(&self) -> u16 {
        self.last_frame().ultrasonic_distance
    }

    pub fn get_ir1(&self) -> u8 {
        self.last_frame().infra_red_1
    }

    pub fn get_ir2(&self) -> u8 {
        self.last_frame().infra_red_2
    }

    pub fn get_sound(&self) -> u8 {
        self.last_frame().sound_level
    }
}
