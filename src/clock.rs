//! Injectable time sources.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at an instant until it is explicitly moved.
#[derive(Debug)]
pub struct UpdatableClock {
    instant: RwLock<DateTime<Utc>>,
}

impl UpdatableClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: RwLock::new(instant),
        }
    }

    pub fn set_instant(&self, instant: DateTime<Utc>) {
        *self.instant.write() = instant;
    }

    /// Moves the clock forward (or backward, for negative durations).
    pub fn advance(&self, duration: Duration) {
        let mut instant = self.instant.write();
        *instant += duration;
    }
}

impl Clock for UpdatableClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.read()
    }
}
