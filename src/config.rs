// Timeouts, topics, link configuration
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Silence on the sensor characteristic longer than this drops the link
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_millis(4500);

// Clears the send-busy gate if a write completion never arrives
pub const SEND_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

// Minimum spacing between automatic re-scans after the link drops
pub const RESCAN_INTERVAL: Duration = Duration::from_millis(2000);

// Reported to the transport when the watchdog fires
pub const DATA_STOPPED_REASON: &str = "Joyworks J1 extension stopped receiving data";

// Longest wait for the shutdown stop to complete before disconnecting
pub const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

// Zenoh topics
pub const TOPIC_CMD_BLOCKS: &str = "joyworks/cmd/blocks"; // block commands
pub const TOPIC_SENSORS: &str = "joyworks/state/sensors"; // latest sensor frame
pub const TOPIC_HEALTH: &str = "joyworks/state/health"; // link health

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Runtime settings. Every field falls back to the constants above, so a
/// config file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub loop_hz: u64,
    pub watchdog_timeout_ms: u64,
    pub send_busy_timeout_ms: u64,
    pub rescan_interval_ms: u64,
    pub topic_cmd_blocks: String,
    pub topic_sensors: String,
    pub topic_health: String,
    /// Only auto-connect to devices advertising this local name
    pub device_name: Option<String>,
    pub auto_connect: bool,
    pub auto_rescan: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            loop_hz: LOOP_HZ,
            watchdog_timeout_ms: WATCHDOG_TIMEOUT.as_millis() as u64,
            send_busy_timeout_ms: SEND_BUSY_TIMEOUT.as_millis() as u64,
            rescan_interval_ms: RESCAN_INTERVAL.as_millis() as u64,
            topic_cmd_blocks: TOPIC_CMD_BLOCKS.to_string(),
            topic_sensors: TOPIC_SENSORS.to_string(),
            topic_health: TOPIC_HEALTH.to_string(),
            device_name: None,
            auto_connect: true,
            auto_rescan: true,
        }
    }
}

impl RuntimeConfig {
    /// Load overrides from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loop_hz == 0 || self.loop_hz > 1000 {
            return Err(ConfigError::Invalid {
                field: "loop_hz",
                reason: format!("must be in 1..=1000, got {}", self.loop_hz),
            });
        }
        if self.watchdog_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "watchdog_timeout_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.send_busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "send_busy_timeout_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn loop_period(&self) -> Duration {
        Duration::from_millis(1000 / self.loop_hz)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn send_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.send_busy_timeout_ms)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }
}
