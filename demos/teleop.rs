// Keyboard teleop: W forward, A/D turn, S/space stop, 1/2 servo, R/F speed, Q quit
//
// Usage: cargo run --example teleop
// (start the runtime first, e.g. `cargo run -- --simulate`)

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use joyworks_link::config::TOPIC_CMD_BLOCKS;
use joyworks_link::messages::BlockCommand;
use std::time::{Duration, Instant};
use tracing::info;

const SPEEDS: [f64; 3] = [30.0, 60.0, 100.0]; // percent
const SERVO_STEP: f64 = 15.0; // degrees
const INPUT_TIMEOUT_MS: u64 = 300; // Stop after this much time with no movement key
const STOP_REPEATS: u8 = 5; // loops a stop is re-sent for, so a busy link cannot drop it
const LOOP_PERIOD: Duration = Duration::from_millis(50);

// What the loop publishes: held motion every iteration, a stop for STOP_REPEATS
#[derive(Debug, Default)]
struct Outbox {
    motion: Option<BlockCommand>,
    stops_left: u8,
}

impl Outbox {
    fn drive(&mut self, cmd: BlockCommand) {
        self.motion = Some(cmd);
        self.stops_left = 0;
    }

    fn stop(&mut self) {
        self.motion = None;
        self.stops_left = STOP_REPEATS;
    }

    fn is_moving(&self) -> bool {
        self.motion.is_some()
    }

    fn due(&mut self) -> Option<BlockCommand> {
        if let Some(cmd) = &self.motion {
            return Some(cmd.clone());
        }
        if self.stops_left > 0 {
            self.stops_left -= 1;
            return Some(BlockCommand::StopMotor);
        }
        None
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_BLOCKS).await?;

    info!("Controls: W=forward, A/D=turn, S/Space=stop, 1/2=servo, R/F=speed, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn publish(
    publisher: &zenoh::pubsub::Publisher<'_>,
    cmd: &BlockCommand,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(serde_json::to_string(cmd)?).await?;
    Ok(())
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut servo_angle: f64 = 90.0;

    // Re-sent every loop so writes dropped by a busy link recover
    let mut outbox = Outbox::default();
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 50ms timeout
        if event::poll(LOOP_PERIOD)? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let speed = SPEEDS[speed_idx];

                match code {
                    KeyCode::Char('w') if pressed => {
                        outbox.drive(BlockCommand::MoveForward { speed });
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        outbox.drive(BlockCommand::TurnLeft { speed });
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        outbox.drive(BlockCommand::TurnRight { speed });
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') | KeyCode::Char(' ') if pressed => {
                        outbox.stop();
                    }

                    // Servo sweep: 1 = servo 1, 2 = servo 2
                    KeyCode::Char(c @ ('1' | '2')) if pressed => {
                        servo_angle = (servo_angle + SERVO_STEP) % 195.0;
                        let servo = if c == '1' { "Servo 1" } else { "Servo 2" };
                        info!("{} -> {} deg", servo, servo_angle);
                        let cmd = BlockCommand::MoveServo {
                            servo: servo.to_string(),
                            angle: servo_angle,
                        };
                        publish(publisher, &cmd).await?;
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Stop if no movement input for INPUT_TIMEOUT_MS
        if outbox.is_moving()
            && last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS)
        {
            outbox.stop();
        }

        if let Some(cmd) = outbox.due() {
            publish(publisher, &cmd).await?;
        }
    }

    outbox.stop();
    while let Some(cmd) = outbox.due() {
        publish(publisher, &cmd).await?;
        tokio::time::sleep(LOOP_PERIOD).await;
    }
    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_repeats_until_stopped() {
        let mut outbox = Outbox::default();
        assert_eq!(outbox.due(), None);

        outbox.drive(BlockCommand::MoveForward { speed: 30.0 });
        for _ in 0..10 {
            assert_eq!(outbox.due(), Some(BlockCommand::MoveForward { speed: 30.0 }));
        }
    }

    #[test]
    fn test_stop_repeats_then_goes_quiet() {
        let mut outbox = Outbox::default();
        outbox.drive(BlockCommand::TurnLeft { speed: 60.0 });
        outbox.due();

        outbox.stop();
        for _ in 0..STOP_REPEATS {
            assert_eq!(outbox.due(), Some(BlockCommand::StopMotor));
        }
        assert_eq!(outbox.due(), None);
    }

    #[test]
    fn test_driving_cancels_pending_stops() {
        let mut outbox = Outbox::default();
        outbox.stop();
        outbox.due();

        outbox.drive(BlockCommand::TurnRight { speed: 100.0 });
        outbox.due();
        outbox.stop();
        assert!(!outbox.is_moving());
        assert_eq!(outbox.due(), Some(BlockCommand::StopMotor));
    }
}
