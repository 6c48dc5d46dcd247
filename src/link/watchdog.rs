// Liveness watchdog for the sensor stream
// Armed on connect, re-armed on each decoded frame, fires once on silence.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Cancelled,
    Armed { deadline: Instant },
    Fired,
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    state: WatchdogState,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: WatchdogState::Cancelled,
        }
    }

    /// Arm (or re-arm) with a fresh deadline measured from `now`
    pub fn arm(&mut self, now: Instant) {
        self.state = WatchdogState::Armed {
            deadline: now + self.timeout,
        };
    }

    pub fn cancel(&mut self) {
        self.state = WatchdogState::Cancelled;
    }

    /// Returns true exactly once, on the first check at or past the deadline
    pub fn check(&mut self, now: Instant) -> bool {
        match self.state {
            WatchdogState::Armed { deadline } if now >= deadline => {
                self.state = WatchdogState::Fired;
                true
            }
            _ => false,
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            WatchdogState::Armed { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
