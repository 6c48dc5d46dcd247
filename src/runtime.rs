// 50 Hz loop driving the peripheral link
// Each tick: apply transport events, apply block commands, check link timers,
// publish sensors and health. The link's own watchdog covers a silent robot;
// re-scanning after a drop is the only recovery path.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Interval, interval};
use tracing::{debug, info, warn};

use crate::config::{RuntimeConfig, SHUTDOWN_FLUSH_TIMEOUT};
use crate::link::{
    ConnectionState, LinkError, LinkEvent, LinkFailure, PeripheralLink, SendOutcome, Transport,
    WriteId,
};
use crate::messages::{BlockCommand, LinkHealth, SensorReading};

pub struct Runtime<T: Transport> {
    link: PeripheralLink<T>,
    config: RuntimeConfig,
    health: LinkHealth,
    last_failure: Option<LinkFailure>,
    last_scan: Option<Instant>,
    pending_connect: Option<String>,
    // Set by a user Disconnect; auto-rescan stays off until the next Scan
    rescan_paused: bool,
}

impl<T: Transport> Runtime<T> {
    pub fn new(transport: T, config: RuntimeConfig) -> Self {
        let link = PeripheralLink::with_timeouts(
            transport,
            config.watchdog_timeout(),
            config.send_busy_timeout(),
        );
        Self {
            link,
            config,
            health: LinkHealth::Disconnected,
            last_failure: None,
            last_scan: None,
            pending_connect: None,
            rescan_paused: false,
        }
    }

    pub fn link(&self) -> &PeripheralLink<T> {
        &self.link
    }

    pub fn health(&self) -> LinkHealth {
        self.health
    }

    pub fn reading(&self) -> SensorReading {
        SensorReading::from(&self.link.last_frame())
    }

    /// Begin a discovery pass
    pub fn start_scan(&mut self, now: Instant) -> Result<(), LinkError> {
        self.last_scan = Some(now);
        self.pending_connect = None;
        self.rescan_paused = false;
        self.link.scan()
    }

    /// Process one transport event
    pub fn on_transport_event(&mut self, event: LinkEvent, now: Instant) {
        match &event {
            LinkEvent::DeviceDiscovered { id, name, .. } => {
                if self.should_auto_connect(name.as_deref()) {
                    info!("Found J1 {} ({:?}), connecting", id, name);
                    match self.link.connect(id) {
                        Ok(()) => self.pending_connect = Some(id.clone()),
                        Err(e) => warn!("Connect to {} failed: {}", id, e),
                    }
                }
            }
            LinkEvent::Connected => {
                self.pending_connect = None;
                self.last_failure = None;
            }
            LinkEvent::Disconnected { .. } => {
                self.pending_connect = None;
            }
            _ => {}
        }

        if let Err(e) = self.link.handle_event(event, now) {
            warn!("Link event failed: {}", e);
        }
    }

    fn should_auto_connect(&self, name: Option<&str>) -> bool {
        if !self.config.auto_connect
            || self.pending_connect.is_some()
            || self.link.state() != ConnectionState::Scanning
        {
            return false;
        }
        match &self.config.device_name {
            Some(wanted) => name == Some(wanted.as_str()),
            None => true,
        }
    }

    /// Process incoming block command
    pub fn on_command(&mut self, cmd: BlockCommand, now: Instant) {
        debug!("Received command: {:?}", &cmd);
        let result = match cmd {
            BlockCommand::MoveForward { speed } => self.link.move_forward(speed, now),
            BlockCommand::TurnLeft { speed } => self.link.turn_left(speed, now),
            BlockCommand::TurnRight { speed } => self.link.turn_right(speed, now),
            BlockCommand::StopMotor => self.link.stop_motor(now),
            BlockCommand::MoveServo { servo, angle } => self.link.move_servo(&servo, angle, now),
            BlockCommand::Scan => {
                if let Err(e) = self.start_scan(now) {
                    warn!("Scan failed: {}", e);
                }
                return;
            }
            BlockCommand::Connect { device } => {
                if let Err(e) = self.link.connect(&device) {
                    warn!("Connect to {} failed: {}", device, e);
                }
                return;
            }
            BlockCommand::Disconnect => {
                self.link.disconnect();
                self.rescan_paused = true;
                return;
            }
        };

        match result {
            Ok(SendOutcome::Sent(_)) => {}
            Ok(SendOutcome::DroppedBusy) => debug!("Command dropped: previous write in flight"),
            Ok(SendOutcome::DroppedDisconnected) => debug!("Command dropped: not connected"),
            Err(e) => warn!("Command failed: {}", e),
        }
    }

    /// Check timers, re-scan if due and recompute health.
    /// A tick that detects a failure reports it; re-scanning waits for the next one.
    pub fn tick(&mut self, now: Instant) -> LinkHealth {
        let failure = self.link.poll(now);
        if let Some(failure) = failure {
            warn!("Link failure: {:?}", failure);
            self.last_failure = Some(failure);
        }

        if failure.is_none()
            && self.config.auto_rescan
            && !self.rescan_paused
            && self.link.state() == ConnectionState::Disconnected
        {
            let due = self
                .last_scan
                .is_none_or(|at| now.duration_since(at) >= self.config.rescan_interval());
            if due {
                if let Err(e) = self.start_scan(now) {
                    warn!("Re-scan failed: {}", e);
                }
            }
        }

        let health = match (self.link.state(), self.last_failure) {
            (ConnectionState::Connected, _) => LinkHealth::Ok,
            (ConnectionState::Scanning, _) => LinkHealth::Scanning,
            (ConnectionState::Disconnected, Some(LinkFailure::DataStopped)) => {
                LinkHealth::DataStopped
            }
            (ConnectionState::Disconnected, None) => LinkHealth::Disconnected,
        };
        if health != self.health {
            info!("Link health: {:?} -> {:?}", self.health, health);
        }
        self.health = health;
        health
    }

    /// Send a stop ahead of shutdown, overriding any write still in flight
    pub fn stop_motors(&mut self, now: Instant) -> Option<WriteId> {
        if !self.link.is_connected() {
            return None;
        }
        match self.link.force_stop(now) {
            Ok(SendOutcome::Sent(id)) => Some(id),
            Ok(outcome) => {
                warn!("Stop not sent on shutdown: {:?}", outcome);
                None
            }
            Err(e) => {
                warn!("Failed to stop motors on shutdown: {}", e);
                None
            }
        }
    }

    /// Stop the robot and drop the connection without waiting on the transport
    pub fn shutdown(&mut self, now: Instant) {
        self.stop_motors(now);
        self.link.disconnect();
    }

    /// Stop the robot, wait up to `flush` for the stop write to complete, then
    /// disconnect. Returns true if the stop was acknowledged.
    pub async fn shutdown_gracefully(
        &mut self,
        events: &mut UnboundedReceiver<LinkEvent>,
        flush: Duration,
    ) -> bool {
        let acked = match self.stop_motors(Instant::now()) {
            Some(stop) => {
                let wait = async {
                    while let Some(event) = events.recv().await {
                        let outcome = match &event {
                            LinkEvent::WriteComplete(id) if *id == stop => Some(true),
                            LinkEvent::Disconnected { .. } => Some(false),
                            _ => None,
                        };
                        self.on_transport_event(event, Instant::now());
                        if let Some(acked) = outcome {
                            return acked;
                        }
                    }
                    false
                };
                match tokio::time::timeout(flush, wait).await {
                    Ok(acked) => acked,
                    Err(_) => {
                        warn!("Stop not acknowledged within {}ms", flush.as_millis());
                        false
                    }
                }
            }
            None => false,
        };
        self.link.disconnect();
        acked
    }
}

/// Wait for the next tick. Returns false once `shutdown` has resolved,
/// including when it resolved while the previous tick was being processed.
async fn wait_tick<F: Future + Unpin>(tick: &mut Interval, shutdown: &mut F) -> bool {
    tokio::select! {
        biased;
        _ = shutdown => false,
        _ = tick.tick() => true,
    }
}

pub async fn run<T: Transport>(
    config: RuntimeConfig,
    transport: T,
    mut events: UnboundedReceiver<LinkEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(config.topic_cmd_blocks.clone()).await?;
    let pub_sensors = session.declare_publisher(config.topic_sensors.clone()).await?;
    let pub_health = session.declare_publisher(config.topic_health.clone()).await?;

    let mut tick = interval(config.loop_period());
    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        config.loop_hz, config.watchdog_timeout_ms
    );
    info!("Subscribed to: {}", config.topic_cmd_blocks);
    info!("Publishing to: {}, {}", config.topic_sensors, config.topic_health);

    let mut runtime = Runtime::new(transport, config);
    runtime.start_scan(Instant::now())?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        if !wait_tick(&mut tick, &mut ctrl_c).await {
            info!("Shutting down");
            break Ok(());
        }
        let now = Instant::now();

        // 1. Apply transport events in arrival order
        while let Ok(event) = events.try_recv() {
            runtime.on_transport_event(event, now);
        }

        // 2. Drain all pending commands (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<BlockCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd, now),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 3. Timers, watchdog, re-scan
        let health = runtime.tick(now);

        // 4. Publish sensors and health
        let publish = async {
            let sensors_json = serde_json::to_string(&runtime.reading())?;
            pub_sensors.put(sensors_json).await?;
            let health_json = serde_json::to_string(&health)?;
            pub_health.put(health_json).await?;
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        };
        if let Err(e) = publish.await {
            break Err(e);
        }
    };

    // Disconnect only after the stop write has gone out
    if runtime.shutdown_gracefully(&mut events, SHUTDOWN_FLUSH_TIMEOUT).await {
        info!("Motors stopped");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::peripheral_tests::FakeTransport;
    use tokio::sync::{mpsc, oneshot};
    use crate::protocol::to_base64;
    use crate::protocol::uuids::{SENSOR_DATA_CHAR, SENSOR_NOTIFY_SERVICE};

    fn discovered(id: &str, name: &str) -> LinkEvent {
        LinkEvent::DeviceDiscovered {
            id: id.to_string(),
            name: Some(name.to_string()),
            rssi: Some(-60),
        }
    }

    fn connected_runtime(now: Instant) -> Runtime<FakeTransport> {
        let mut runtime = Runtime::new(FakeTransport::default(), RuntimeConfig::default());
        runtime.start_scan(now).unwrap();
        runtime.on_transport_event(discovered("j1-a", "J1"), now);
        runtime.on_transport_event(LinkEvent::Connected, now);
        runtime
    }

    #[test]
    fn test_auto_connects_to_first_device_only() {
        let now = Instant::now();
        let mut runtime = Runtime::new(FakeTransport::default(), RuntimeConfig::default());
        runtime.start_scan(now).unwrap();

        runtime.on_transport_event(discovered("j1-a", "J1"), now);
        runtime.on_transport_event(discovered("j1-b", "J1"), now);

        assert_eq!(runtime.link().transport().connects, vec!["j1-a".to_string()]);
    }

    #[test]
    fn test_device_name_filter() {
        let now = Instant::now();
        let config = RuntimeConfig {
            device_name: Some("J1-KITCHEN".to_string()),
            ..RuntimeConfig::default()
        };
        let mut runtime = Runtime::new(FakeTransport::default(), config);
        runtime.start_scan(now).unwrap();

        runtime.on_transport_event(discovered("other", "J1-GARAGE"), now);
        runtime.on_transport_event(discovered("mine", "J1-KITCHEN"), now);

        assert_eq!(runtime.link().transport().connects, vec!["mine".to_string()]);
    }

    #[test]
    fn test_health_follows_connection() {
        let now = Instant::now();
        let mut runtime = connected_runtime(now);
        assert_eq!(runtime.tick(now), LinkHealth::Ok);

        runtime.on_command(BlockCommand::Disconnect, now);
        let config = RuntimeConfig {
            auto_rescan: false,
            ..RuntimeConfig::default()
        };
        runtime.config = config;
        assert_eq!(runtime.tick(now), LinkHealth::Disconnected);
    }

    #[test]
    fn test_silence_reports_data_stopped_then_rescans() {
        let now = Instant::now();
        let mut runtime = connected_runtime(now);
        let timeout = runtime.config.watchdog_timeout();

        assert_eq!(runtime.tick(now + timeout), LinkHealth::DataStopped);
        assert_eq!(runtime.link().transport().failures.len(), 1);
        assert_eq!(runtime.link().transport().discovers.len(), 1);

        // Last scan was at `now`, so the re-scan interval has long passed
        let next = now + timeout + Duration::from_millis(20);
        assert_eq!(runtime.tick(next), LinkHealth::Scanning);
        assert_eq!(runtime.link().transport().discovers.len(), 2);
    }

    #[test]
    fn test_data_stopped_visible_without_rescan() {
        let now = Instant::now();
        let mut runtime = connected_runtime(now);
        runtime.config.auto_rescan = false;
        let timeout = runtime.config.watchdog_timeout();

        assert_eq!(runtime.tick(now + timeout), LinkHealth::DataStopped);
        assert_eq!(runtime.tick(now + timeout * 2), LinkHealth::DataStopped);
    }

    #[test]
    fn test_rescan_rate_limited() {
        let now = Instant::now();
        let mut runtime = Runtime::new(FakeTransport::default(), RuntimeConfig::default());
        runtime.start_scan(now).unwrap();
        runtime.on_transport_event(LinkEvent::Disconnected { reason: None }, now);

        let interval = runtime.config.rescan_interval();
        runtime.tick(now + interval / 2);
        assert_eq!(runtime.link().transport().discovers.len(), 1);
        runtime.tick(now + interval);
        assert_eq!(runtime.link().transport().discovers.len(), 2);
    }

    #[test]
    fn test_commands_reach_link() {
        let now = Instant::now();
        let mut runtime = connected_runtime(now);

        runtime.on_command(BlockCommand::MoveForward { speed: 80.0 }, now);
        // Second command while the first write is outstanding is dropped
        runtime.on_command(BlockCommand::StopMotor, now);

        assert_eq!(runtime.link().transport().writes.len(), 1);
    }

    #[test]
    fn test_reading_reflects_latest_frame() {
        let now = Instant::now();
        let mut runtime = connected_runtime(now);
        runtime.on_transport_event(
            LinkEvent::Notification {
                service: SENSOR_NOTIFY_SERVICE,
                characteristic: SENSOR_DATA_CHAR,
                payload: to_base64(&[0x2C, 0x01, 0x05, 0x09, 0x32]),
            },
            now,
        );
        assert_eq!(
            runtime.reading(),
            SensorReading {
                ultra_sonic: 300,
                ir1: 5,
                ir2: 9,
                sound: 50
            }
        );
    }

    #[test]
    fn test_shutdown_stops_motors() {
        let now = Instant::now();
        let mut runtime = connected_runtime(now);
        runtime.shutdown(now);

        let writes = &runtime.link().transport().writes;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].payload, to_base64(&[0, 0, 0, 0, 0, 0, 0, 0, 0x03]));
        assert_eq!(runtime.link().state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_manual_disconnect_pauses_rescan() {
        let now = Instant::now();
        let mut runtime = connected_runtime(now);
        runtime.on_command(BlockCommand::Disconnect, now);

        let interval = runtime.config.rescan_interval();
        assert_eq!(runtime.tick(now + interval * 3), LinkHealth::Disconnected);
        assert_eq!(runtime.link().transport().discovers.len(), 1);

        // An explicit scan resumes normal discovery
        runtime.on_command(BlockCommand::Scan, now + interval * 3);
        assert_eq!(runtime.tick(now + interval * 3), LinkHealth::Scanning);
        assert_eq!(runtime.link().transport().discovers.len(), 2);
    }

    #[test]
    fn test_shutdown_stops_motors_while_write_in_flight() {
        let now = Instant::now();
        let mut runtime = connected_runtime(now);
        runtime.on_command(BlockCommand::MoveForward { speed: 100.0 }, now);

        // No completion for the motion write before shutdown
        runtime.shutdown(now);

        let writes = &runtime.link().transport().writes;
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].payload, "AAAAZAAAAGQB");
        assert_eq!(writes[1].payload, to_base64(&[0, 0, 0, 0, 0, 0, 0, 0, 0x03]));
        assert_eq!(runtime.link().state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_shutdown_waits_for_stop_ack() {
        let now = Instant::now();
        let mut runtime = connected_runtime(now);
        runtime.on_command(BlockCommand::MoveForward { speed: 100.0 }, now);

        // Motion write is WriteId(1), the stop is WriteId(2); both ack late
        let (tx, mut rx) = mpsc::unbounded_channel();
        let acks = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(LinkEvent::WriteComplete(WriteId(1))).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(LinkEvent::WriteComplete(WriteId(2))).unwrap();
            tx
        });

        assert!(runtime.shutdown_gracefully(&mut rx, Duration::from_millis(500)).await);
        let _tx = acks.await.unwrap();

        let transport = runtime.link().transport();
        assert_eq!(transport.writes.len(), 2);
        assert_eq!(transport.writes[1].id, WriteId(2));
        assert_eq!(transport.disconnects, 1);
        assert_eq!(runtime.link().state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_shutdown_disconnects_after_flush_window() {
        let now = Instant::now();
        let mut runtime = connected_runtime(now);
        let (_tx, mut rx) = mpsc::unbounded_channel();

        assert!(!runtime.shutdown_gracefully(&mut rx, Duration::from_millis(500)).await);
        assert_eq!(runtime.link().transport().writes.len(), 1);
        assert_eq!(runtime.link().transport().disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_signal_between_ticks_is_seen() {
        let mut tick = interval(Duration::from_millis(20));
        let (tx, mut shutdown) = oneshot::channel::<()>();

        assert!(wait_tick(&mut tick, &mut shutdown).await);
        // Signal arrives while the loop body would be running
        tx.send(()).unwrap();
        assert!(!wait_tick(&mut tick, &mut shutdown).await);
    }
}
