// Single-flight gate for outbound writes
//
// At most one write is outstanding. A write that never reports completion is
// released after the fallback window so the link cannot lock up.

use std::time::{Duration, Instant};

use super::transport::WriteId;

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: WriteId,
    deadline: Instant,
}

#[derive(Debug, Clone)]
pub struct SendGate {
    fallback: Duration,
    in_flight: Option<InFlight>,
    next_id: u64,
}

impl SendGate {
    pub fn new(fallback: Duration) -> Self {
        Self {
            fallback,
            in_flight: None,
            next_id: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Claim the gate for a new write. `None` while another write is in flight.
    pub fn begin(&mut self, now: Instant) -> Option<WriteId> {
        if self.in_flight.is_some() {
            return None;
        }
        self.next_id += 1;
        let id = WriteId(self.next_id);
        self.in_flight = Some(InFlight {
            id,
            deadline: now + self.fallback,
        });
        Some(id)
    }

    /// Release the gate for a completed write. Completions for writes that
    /// were already released (fallback expiry, reset) are ignored.
    pub fn complete(&mut self, id: WriteId) -> bool {
        match self.in_flight {
            Some(current) if current.id == id => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Release the gate if the in-flight write's fallback window has passed
    pub fn expire(&mut self, now: Instant) -> Option<WriteId> {
        match self.in_flight {
            Some(current) if now >= current.deadline => {
                self.in_flight = None;
                Some(current.id)
            }
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.in_flight = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.in_flight.map(|f| f.deadline)
    }

    pub fn in_flight(&self) -> Option<WriteId> {
        self.in_flight.map(|f| f.id)
    }
}
