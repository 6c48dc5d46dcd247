// Sensor monitor: READ-ONLY view of what the runtime publishes
//
// Sends nothing to the robot. Prints link health changes and the latest
// sensor frame about twice a second.
//
// Usage: cargo run --example sensor_monitor

use joyworks_link::config::{TOPIC_HEALTH, TOPIC_SENSORS};
use joyworks_link::messages::{LinkHealth, SensorReading};
use std::time::{Duration, Instant};

const PRINT_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse()?),
        )
        .init();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║             Joyworks J1 Sensor Monitor (READ-ONLY)           ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Listening on: {}, {}", TOPIC_SENSORS, TOPIC_HEALTH);
    println!();

    let session = zenoh::open(zenoh::Config::default()).await?;
    let sensors = session.declare_subscriber(TOPIC_SENSORS).await?;
    let health = session.declare_subscriber(TOPIC_HEALTH).await?;

    let mut last_health: Option<LinkHealth> = None;
    let mut latest: Option<SensorReading> = None;
    let mut last_print = Instant::now();

    loop {
        tokio::time::sleep(Duration::from_millis(20)).await;

        while let Ok(Some(sample)) = health.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<LinkHealth>(&payload) {
                Ok(h) if last_health != Some(h) => {
                    println!("Link: {:?}", h);
                    last_health = Some(h);
                }
                Ok(_) => {}
                Err(e) => println!("  ✗ Bad health message: {}", e),
            }
        }

        while let Ok(Some(sample)) = sensors.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<SensorReading>(&payload) {
                Ok(reading) => latest = Some(reading),
                Err(e) => println!("  ✗ Bad sensor message: {}", e),
            }
        }

        if last_print.elapsed() >= PRINT_INTERVAL {
            last_print = Instant::now();
            if let (Some(LinkHealth::Ok), Some(r)) = (last_health, latest) {
                println!(
                    "  ultrasonic={:>5}cm  ir1={}  ir2={}  sound={:>3}",
                    r.ultra_sonic, r.ir1, r.ir2, r.sound
                );
            }
        }
    }
}
