//! Deterministic time.

use chrono::{DateTime, Utc};
use flashsale_core::Clock;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A settable clock. Clones share the same instant, so a test can hold one
/// handle while the services under test hold another.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    /// Creates a clock pinned to `time`.
    #[must_use]
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(Mutex::new(time)),
        }
    }

    /// Moves the clock to an absolute instant.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
    }

    /// Advances the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut t = self.time.lock().unwrap_or_else(PoisonError::into_inner);
        *t += chrono::TimeDelta::from_std(delta).unwrap_or_default();
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
